//! Property tests over whole ingested chains.
//!
//! Chains are generated as a single spend path: every transaction spends
//! the previous transaction's output when it can afford the fee, and pays
//! to one of a handful of addresses so entity keys repeat across blocks.
//!
//! Properties:
//! - Cache capacity never changes the rows produced
//! - Tracked transactions balance: inputs + withdrawals = outputs + fee + deposit
//! - Consumption tracking marks every spent output and skips tx_in rows
//! - Rollback to any stored block followed by replay equals a straight ingest

use proptest::prelude::*;

use dbsync_core::certs::Certificate;
use dbsync_core::options::TxOutOptions;
use dbsync_core::schema::{keys, Table, TxOutRow, TxRow};
use dbsync_core::store::{DbStore, DbStoreExt, MemoryStore};
use dbsync_core::types::{Block, Hash32};
use dbsync_sync::cache::CacheSizes;
use dbsync_sync::rollback::rollback_to;
use dbsync_sync::state::SyncSettings;
use dbsync_tests::helpers::*;

#[derive(Clone, Debug)]
struct TxPlan {
    payee: u8,
    stake: Option<u8>,
    fee: u64,
    deregister: Option<u8>,
}

fn tx_plan() -> impl Strategy<Value = TxPlan> {
    (0u8..6, prop::option::of(0u8..4), 150_000u64..2_000_000, prop::option::weighted(0.2, 0u8..4))
        .prop_map(|(payee, stake, fee, deregister)| TxPlan { payee, stake, fee, deregister })
}

fn chain_plan() -> impl Strategy<Value = Vec<Vec<TxPlan>>> {
    prop::collection::vec(prop::collection::vec(tx_plan(), 0..4), 1..8)
}

/// Build blocks from the plan. Three blocks per epoch.
fn build_chain(plan: &[Vec<TxPlan>]) -> Vec<Block> {
    let mut seed = 0u64;
    let mut utxo: Option<(Hash32, u64)> = None;
    let mut blocks = Vec::with_capacity(plan.len());
    for (n, txs) in plan.iter().enumerate() {
        let mut block_txs = Vec::with_capacity(txs.len());
        for t in txs {
            seed += 1;
            let (inputs, value) = match utxo {
                Some((hash, value)) if value > t.fee => (vec![input(hash, 0)], value - t.fee),
                _ => (vec![], 45_000_000),
            };
            let mut tx = make_tx(seed, inputs, vec![output(0, address(t.payee, t.stake.map(stake)), value)], t.fee);
            if let Some(s) = t.deregister {
                tx.certificates.push(cert(0, Certificate::StakeDeregistration { address: stake(s), refund: None }));
            }
            utxo = Some((tx.hash, value));
            block_txs.push(tx);
        }
        let n = n as u64 + 1;
        blocks.push(make_block(n, n / 3, block_txs));
    }
    blocks
}

fn tiny_caches() -> CacheSizes {
    CacheSizes { stake_address: 1, pool: 1, block: 1, datum: 1, multi_asset: 1, address: 2 }
}

fn consuming() -> SyncSettings {
    SyncSettings { tx_out: TxOutOptions { consumed: true, ..TxOutOptions::default() }, ..SyncSettings::default() }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cache_capacity_does_not_change_rows(plan in chain_plan()) {
        let blocks = build_chain(&plan);
        let mut full = MemoryStore::new();
        let mut tiny = MemoryStore::new();
        let mut none = MemoryStore::new();
        ingest_all(&env(), &mut full, &blocks);
        ingest_all(&env_with(SyncSettings { cache_sizes: tiny_caches(), ..SyncSettings::default() }), &mut tiny, &blocks);
        ingest_all(&uncached_env(), &mut none, &blocks);

        let reference = dump(&none);
        prop_assert_eq!(&dump(&full), &reference);
        prop_assert_eq!(&dump(&tiny), &reference);
    }

    #[test]
    fn tracked_transactions_balance(plan in chain_plan()) {
        let blocks = build_chain(&plan);
        let mut store = MemoryStore::new();
        ingest_all(&env(), &mut store, &blocks);

        for tx in blocks.iter().flat_map(|b| &b.txs) {
            let id = store.lookup(Table::Tx, tx.hash.as_bytes()).unwrap().unwrap();
            let row: TxRow = store.fetch(id).unwrap().unwrap();
            prop_assert_eq!(row.fee, tx.fees.unwrap());
            let inputs: i128 = tx
                .inputs
                .iter()
                .map(|i| {
                    let producer = store.lookup(Table::Tx, i.tx_hash.as_bytes()).unwrap().unwrap();
                    let out = store.find::<TxOutRow>(&keys::pair(producer, i.index)).unwrap().unwrap();
                    store.fetch::<TxOutRow>(out).unwrap().unwrap().value as i128
                })
                .sum();
            let deposit = row.deposit.unwrap() as i128;
            prop_assert_eq!(inputs, row.out_sum as i128 + row.fee as i128 + deposit);
            if !tx.inputs.is_empty() {
                prop_assert_eq!(deposit, 0);
            }
        }
        let spends = blocks.iter().flat_map(|b| &b.txs).filter(|t| !t.inputs.is_empty()).count() as u64;
        prop_assert_eq!(store.count(Table::TxIn).unwrap(), spends);
    }

    #[test]
    fn consumption_tracking_marks_spent_outputs(plan in chain_plan()) {
        let blocks = build_chain(&plan);
        let mut store = MemoryStore::new();
        ingest_all(&env_with(consuming()), &mut store, &blocks);

        prop_assert_eq!(store.count(Table::TxIn).unwrap(), 0);
        for tx in blocks.iter().flat_map(|b| &b.txs) {
            let spender = store.lookup(Table::Tx, tx.hash.as_bytes()).unwrap().unwrap();
            for i in &tx.inputs {
                let producer = store.lookup(Table::Tx, i.tx_hash.as_bytes()).unwrap().unwrap();
                let out = store.find::<TxOutRow>(&keys::pair(producer, i.index)).unwrap().unwrap();
                let row: TxOutRow = store.fetch(out).unwrap().unwrap();
                prop_assert_eq!(row.consumed_by_tx_id, Some(spender));
            }
        }
    }

    #[test]
    fn rollback_and_replay_equals_straight_ingest(plan in chain_plan(), pick in any::<prop::sample::Index>()) {
        let blocks = build_chain(&plan);
        let mut straight = MemoryStore::new();
        ingest_all(&env_with(consuming()), &mut straight, &blocks);

        let env = env_with(consuming());
        let mut store = MemoryStore::new();
        ingest_all(&env, &mut store, &blocks);
        let keep = pick.index(blocks.len()) + 1;
        rollback_to(&env, &mut store, Some(blocks[keep - 1].hash)).unwrap();
        prop_assert_eq!(store.count(Table::Block).unwrap(), keep as u64);

        ingest_all(&env, &mut store, &blocks[keep..]);
        prop_assert_eq!(dump(&store), dump(&straight));
    }
}
