//! End-to-end ingestion scenarios.
//!
//! Each test feeds whole blocks through `insert_block` (or the node driver)
//! and checks the rows that come out the other end.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use dbsync_core::certs::{Certificate, DelegTarget, PoolParams};
use dbsync_core::error::{LookupError, SyncError};
use dbsync_core::gov::{Anchor, GovActionId};
use dbsync_core::ledger::{ApplyResult, EnactState, NewEpoch};
use dbsync_core::options::{InsertOptions, TxOutOptions};
use dbsync_core::schema::{
    keys, BlockRow, DelegationRow, EpochRow, GovActionProposalRow, PoolUpdateRow, StakeDeregistrationRow, Table, TxInRow,
    TxOutRow, TxRow, WithdrawalRow,
};
use dbsync_core::store::{DbStore, DbStoreExt, MemoryStore};
use dbsync_core::types::{Block, Hash28, Tx, Withdrawal};
use dbsync_node_lib::feed::{write_feed, FeedItem, FeedReader};
use dbsync_node_lib::{SyncConfig, SyncNode};
use dbsync_sync::block::{insert_block, BlockOutcome};
use dbsync_sync::cache::CacheClass;
use dbsync_sync::offchain::PoolFetchResult;
use dbsync_sync::rollback::rollback_to;
use dbsync_sync::state::SyncSettings;
use dbsync_tests::helpers::*;

// ---------------------------------------------------------------------------
// Entity cache
// ---------------------------------------------------------------------------

#[test]
fn deregistration_evicts_stake_address_before_next_output() {
    let env = env();
    let mut store = MemoryStore::new();
    let s = stake(0x51);

    // Block 1 pays to an address delegating to `s`, caching the stake address.
    let fund = make_tx(1, vec![], vec![output(0, address(1, Some(s)), 5_000_000)], 0);
    ingest_all(&env, &mut store, &[make_block(1, 10, vec![fund])]);
    let after_first = env.cache.stats(CacheClass::StakeAddress);
    assert_eq!((after_first.hits, after_first.misses, after_first.len), (0, 1, 1));

    // Block 2: tx1 deregisters `s` (cert 0), tx2 pays to it again.
    let dereg = Tx {
        certificates: vec![cert(0, Certificate::StakeDeregistration { address: s, refund: Some(2_000_000) })],
        ..make_tx(2, vec![], vec![], 170_000)
    };
    let pay = make_tx(3, vec![], vec![output(0, address(2, Some(s)), 1_000_000)], 170_000);
    ingest_all(&env, &mut store, &[make_block(2, 10, vec![dereg, pay])]);

    let stats = env.cache.stats(CacheClass::StakeAddress);
    // The deregistration hit the cache and evicted; the output then missed.
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);

    // The fresh lookup found the stored row instead of inserting a new one.
    assert_eq!(store.count(Table::StakeAddress).unwrap(), 1);
    let (_, dereg_row) = store.rows::<StakeDeregistrationRow>().unwrap().remove(0);
    let pay_tx = store.lookup(Table::Tx, tx_hash(3).as_bytes()).unwrap().unwrap();
    let out_id = store.find::<TxOutRow>(&keys::pair(pay_tx, 0)).unwrap().unwrap();
    let out: TxOutRow = store.fetch(out_id).unwrap().unwrap();
    assert_eq!(out.stake_address_id, Some(dereg_row.addr_id));
}

#[test]
fn disabled_cache_produces_identical_rows() {
    let blocks = sample_chain();
    let cached = env();
    let uncached = uncached_env();
    let mut a = MemoryStore::new();
    let mut b = MemoryStore::new();
    ingest_all(&cached, &mut a, &blocks);
    ingest_all(&uncached, &mut b, &blocks);

    assert_eq!(dump(&a), dump(&b));
    assert_eq!(uncached.cache.stats(CacheClass::StakeAddress).len, 0);
    assert!(cached.cache.stats(CacheClass::StakeAddress).hits > 0);
}

/// Three blocks exercising outputs, spends, delegation, and withdrawals.
fn sample_chain() -> Vec<Block> {
    let s1 = stake(1);
    let s2 = stake(2);
    let fund = make_tx(
        1,
        vec![],
        vec![output(0, address(1, Some(s1)), 20_000_000), output(1, address(2, Some(s2)), 8_000_000)],
        0,
    );
    let reg = Tx {
        certificates: vec![
            cert(0, Certificate::PoolRegistration(pool_params(9))),
            cert(1, Certificate::StakeRegistration { address: s1, deposit: Some(2_000_000) }),
        ],
        ..make_tx(2, vec![input(tx_hash(1), 0)], vec![output(0, address(1, Some(s1)), 17_800_000)], 200_000)
    };
    let deleg = Tx {
        certificates: vec![cert(
            0,
            Certificate::Delegation { address: s1, target: DelegTarget::Pool(Hash28([9; 28])) },
        )],
        withdrawals: vec![Withdrawal { address: s2, amount: 500_000, redeemer_index: None }],
        ..make_tx(3, vec![input(tx_hash(2), 0)], vec![output(0, address(2, Some(s2)), 18_100_000)], 200_000)
    };
    vec![make_block(1, 4, vec![fund]), make_block(2, 4, vec![reg]), make_block(3, 5, vec![deleg])]
}

// ---------------------------------------------------------------------------
// Block chaining
// ---------------------------------------------------------------------------

#[test]
fn block_without_stored_parent_fails_and_leaves_nothing() {
    let env = env();
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &[make_block(1, 0, vec![])]);

    let err = insert_block(&env, &mut store, &make_block(3, 0, vec![]), &ApplyResult::default(), None).unwrap_err();
    assert!(matches!(err.root(), SyncError::Lookup(LookupError::PreviousBlock(_))));
    assert_eq!(store.count(Table::Block).unwrap(), 1);

    // Once the parent arrives the same block goes in.
    ingest_all(&env, &mut store, &[make_block(2, 0, vec![]), make_block(3, 0, vec![])]);
    let id = store.find::<BlockRow>(&keys::block_no(3)).unwrap().unwrap();
    let row: BlockRow = store.fetch(id).unwrap().unwrap();
    assert_eq!(row.previous_id, Some(id - 1));
}

// ---------------------------------------------------------------------------
// Fees and input/output tracking
// ---------------------------------------------------------------------------

#[test]
fn tracked_transactions_balance() {
    let env = env();
    let mut store = MemoryStore::new();
    let blocks = sample_chain();
    ingest_all(&env, &mut store, &blocks);

    for tx in blocks.iter().flat_map(|b| &b.txs).filter(|tx| !tx.inputs.is_empty()) {
        let tx_id = store.lookup(Table::Tx, tx.hash.as_bytes()).unwrap().unwrap();
        let row: TxRow = store.fetch(tx_id).unwrap().unwrap();

        let inputs: u128 = store
            .rows::<TxInRow>()
            .unwrap()
            .into_iter()
            .filter(|(_, r)| r.tx_in_id == tx_id)
            .map(|(_, r)| {
                let out_id = store.find::<TxOutRow>(&keys::pair(r.tx_out_id, r.tx_out_index)).unwrap().unwrap();
                store.fetch::<TxOutRow>(out_id).unwrap().unwrap().value as u128
            })
            .sum();
        let withdrawals: u128 = store
            .rows::<WithdrawalRow>()
            .unwrap()
            .into_iter()
            .filter(|(_, w)| w.tx_id == tx_id)
            .map(|(_, w)| w.amount as u128)
            .sum();
        let deposit = row.deposit.expect("deposit derivable from resolved inputs");
        assert_eq!(
            (inputs + withdrawals) as i128,
            row.out_sum as i128 + row.fee as i128 + deposit as i128,
            "tx {}",
            tx.hash
        );
    }

    let reg_tx = store.lookup(Table::Tx, tx_hash(2).as_bytes()).unwrap().unwrap();
    let reg: TxRow = store.fetch(reg_tx).unwrap().unwrap();
    assert_eq!(reg.deposit, Some(2_000_000));
}

#[test]
fn disabled_io_tracking_stores_no_inputs_or_outputs() {
    let env = env_with(SyncSettings {
        options: InsertOptions { inputs_outputs: false, ..InsertOptions::default() },
        ..SyncSettings::default()
    });
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &sample_chain());

    assert_eq!(store.count(Table::Tx).unwrap(), 3);
    assert_eq!(store.count(Table::TxIn).unwrap(), 0);
    assert_eq!(store.count(Table::TxOut).unwrap(), 0);
    let fees: Vec<u64> = store.rows::<TxRow>().unwrap().into_iter().map(|(_, t)| t.fee).collect();
    assert_eq!(fees, vec![0, 200_000, 200_000]);
}

#[test]
fn ledger_deposit_wins_over_derivation() {
    let env = env();
    let mut store = MemoryStore::new();
    let blocks = sample_chain();
    ingest_all(&env, &mut store, &blocks[..1]);

    let apply = ApplyResult { deposits: [(tx_hash(2), 2_500_000)].into_iter().collect(), ..ApplyResult::default() };
    insert_block(&env, &mut store, &blocks[1], &apply, None).unwrap();
    let id = store.lookup(Table::Tx, tx_hash(2).as_bytes()).unwrap().unwrap();
    let row: TxRow = store.fetch(id).unwrap().unwrap();
    assert_eq!((row.fee, row.deposit), (200_000, Some(2_500_000)));
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

fn pool_reg_tx(seed: u64, pools: &[PoolParams]) -> Tx {
    Tx {
        certificates: pools
            .iter()
            .enumerate()
            .map(|(i, p)| cert(i as u16, Certificate::PoolRegistration(p.clone())))
            .collect(),
        ..make_tx(seed, vec![], vec![], 180_000)
    }
}

fn active_epochs(store: &MemoryStore) -> Vec<u64> {
    store.rows::<PoolUpdateRow>().unwrap().into_iter().map(|(_, u)| u.active_epoch_no).collect()
}

#[test]
fn pool_activation_delays() {
    // A new pool registered twice in one block: 2 epochs, then 3.
    let mut store = MemoryStore::new();
    let block = make_block(1, 100, vec![pool_reg_tx(1, &[pool_params(7), pool_params(7)])]);
    ingest_all(&env(), &mut store, &[block]);
    assert_eq!(active_epochs(&store), vec![102, 103]);

    // A pool the ledger already knows: 3 epochs.
    let mut store = MemoryStore::new();
    let apply = ApplyResult { registered_pools: HashSet::from([Hash28([8; 28])]), ..ApplyResult::default() };
    let block = make_block(1, 100, vec![pool_reg_tx(1, &[pool_params(8)])]);
    insert_block(&env(), &mut store, &block, &apply, None).unwrap();
    assert_eq!(active_epochs(&store), vec![103]);
}

#[test]
fn delegation_activates_two_epochs_later() {
    let env = env();
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &sample_chain());
    let (_, deleg) = store.rows::<DelegationRow>().unwrap().remove(0);
    assert_eq!(deleg.active_epoch_no, 7);
    assert_eq!(deleg.slot_no, 60);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn rollback_then_replay_matches_straight_ingest() {
    let blocks = sample_chain();

    let straight_env = env();
    let mut straight = MemoryStore::new();
    ingest_all(&straight_env, &mut straight, &blocks);

    let env = env();
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &blocks);
    let deleted = rollback_to(&env, &mut store, Some(block_hash(1))).unwrap();
    assert!(deleted > 0);
    assert_eq!(store.count(Table::Block).unwrap(), 1);
    assert_eq!(store.count(Table::PoolUpdate).unwrap(), 0);
    assert_eq!(env.state.db_tip().and_then(|t| t.block_no), Some(1));

    // The spent output of tx 1 is whole again and ids restart where they were.
    ingest_all(&env, &mut store, &blocks[1..]);
    assert_eq!(dump(&store), dump(&straight));
}

#[test]
fn rollback_to_tip_is_a_no_op() {
    let env = env();
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &sample_chain());
    assert_eq!(rollback_to(&env, &mut store, Some(block_hash(3))).unwrap(), 0);
    assert_eq!(store.count(Table::Block).unwrap(), 3);
}

#[test]
fn rollback_to_origin_empties_the_store() {
    let env = env();
    let mut store = MemoryStore::new();
    ingest_all(&env, &mut store, &sample_chain());
    rollback_to(&env, &mut store, None).unwrap();
    for table in Table::ALL {
        assert_eq!(store.count(*table).unwrap(), 0, "{table}");
    }
    assert!(env.state.db_tip().is_none());
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[test]
fn enacting_an_action_enacts_its_chain() {
    let env = env();
    let mut store = MemoryStore::new();
    let first = GovActionId { tx_hash: tx_hash(1), index: 0 };
    let second = GovActionId { tx_hash: tx_hash(2), index: 0 };

    let propose_a = Tx { proposals: vec![hard_fork(None, 10)], ..make_tx(1, vec![], vec![], 200_000) };
    let propose_b = Tx { proposals: vec![hard_fork(Some(first), 11)], ..make_tx(2, vec![], vec![], 200_000) };
    ingest_all(&env, &mut store, &[make_block(1, 500, vec![propose_a]), make_block(2, 500, vec![propose_b])]);

    let b_id = store.find::<GovActionProposalRow>(&keys::pair(2, 0)).unwrap().unwrap();
    let b: GovActionProposalRow = store.fetch(b_id).unwrap().unwrap();
    assert!(b.prev_gov_action_proposal.is_some());

    let apply = ApplyResult {
        new_epoch: Some(NewEpoch {
            epoch_no: 501,
            params: None,
            nonce: None,
            ada_pots: None,
            drep_distr: None,
            enact: Some(EnactState { ratified: vec![second], enacted: vec![second], ..EnactState::default() }),
            rewards: vec![],
        }),
        ..ApplyResult::default()
    };
    insert_block(&env, &mut store, &make_block(3, 501, vec![]), &apply, None).unwrap();

    let rows: Vec<GovActionProposalRow> =
        store.rows::<GovActionProposalRow>().unwrap().into_iter().map(|(_, r)| r).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.enacted_epoch == Some(501)));
    assert_eq!(rows[0].ratified_epoch, None);
    assert_eq!(rows[1].ratified_epoch, Some(501));
    assert_eq!(store.count(Table::Epoch).unwrap(), 1);
}

#[test]
fn each_new_anchor_queues_one_vote_fetch() {
    let env = env();
    let mut store = MemoryStore::new();
    let shared = Anchor { url: "https://gov.example/shared.json".into(), data_hash: [3u8; 32].into() };
    let mut a = hard_fork(None, 10);
    a.anchor = shared.clone();
    let mut b = hard_fork(None, 12);
    b.anchor = shared;
    let tx = Tx { proposals: vec![a, b], ..make_tx(1, vec![], vec![], 200_000) };
    ingest_all(&env, &mut store, &[make_block(1, 500, vec![tx])]);

    assert_eq!(store.count(Table::VotingAnchor).unwrap(), 1);
    assert_eq!(env.queues.vote_work.len(), 1);
}

// ---------------------------------------------------------------------------
// Epoch rows
// ---------------------------------------------------------------------------

#[test]
fn epoch_row_after_restart_mid_epoch_covers_the_whole_epoch() {
    let fee = |n: u64| 170_000 + n * 1_000;
    let tx = |n: u64| make_tx(n, vec![], vec![output(0, address(n as u8, None), 5_000_000)], fee(n));
    let blocks = vec![
        make_block(1, 3, vec![tx(1)]),
        make_block(2, 4, vec![tx(2)]),
        make_block(3, 4, vec![tx(3)]),
        make_block(4, 4, vec![tx(4)]),
        make_block(5, 5, vec![]),
    ];
    let mut store = MemoryStore::new();
    ingest_all(&env(), &mut store, &blocks[..3]);

    // A fresh environment holds no block diffs for the epoch in progress.
    let restarted = env();
    ingest_all(&restarted, &mut store, &blocks[3..4]);
    let apply = ApplyResult {
        new_epoch: Some(NewEpoch {
            epoch_no: 5,
            params: None,
            nonce: None,
            ada_pots: None,
            drep_distr: None,
            enact: None,
            rewards: vec![],
        }),
        ..ApplyResult::default()
    };
    insert_block(&restarted, &mut store, &blocks[4], &apply, None).unwrap();

    let id = store.find::<EpochRow>(&keys::number(4)).unwrap().unwrap();
    let row: EpochRow = store.fetch(id).unwrap().unwrap();
    assert_eq!((row.blk_count, row.tx_count), (3, 3));
    assert_eq!(row.fees, (fee(2) + fee(3) + fee(4)) as u128);
    assert_eq!(row.out_sum, 15_000_000);
    assert_eq!((row.start_time, row.end_time), (block_time(2).timestamp(), block_time(4).timestamp()));
}

// ---------------------------------------------------------------------------
// Off-chain queue backpressure
// ---------------------------------------------------------------------------

#[test]
fn full_pool_queue_blocks_ingestion_until_drained() {
    let env = Arc::new(env());
    let pools: Vec<PoolParams> = (0..101u8)
        .map(|i| PoolParams {
            metadata: Some(Anchor { url: format!("https://pool.example/{i}.json"), data_hash: [i; 32].into() }),
            ..pool_params(i)
        })
        .collect();
    let block = make_block(1, 200, vec![pool_reg_tx(1, &pools)]);

    let (done_tx, done_rx) = mpsc::channel();
    let worker_env = env.clone();
    let handle = std::thread::spawn(move || {
        let mut store = MemoryStore::new();
        let res = insert_block(&worker_env, &mut store, &block, &ApplyResult::default(), None);
        done_tx.send(()).ok();
        (res.map_err(|e| e.to_string()), store)
    });

    // 100 requests fit; the 101st push waits for room.
    assert!(done_rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(env.queues.pool_work.len(), 100);

    let first = env.queues.pool_work.try_pop().unwrap();
    assert_eq!(first.url, "https://pool.example/0.json");
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let (res, store) = handle.join().unwrap();
    assert!(matches!(res.unwrap(), BlockOutcome::Inserted { fetches: 101, .. }));
    assert_eq!(env.queues.pool_work.len(), 100);
    assert_eq!(store.count(Table::PoolMetadataRef).unwrap(), 101);
}

#[test]
fn live_worker_with_full_result_queue_does_not_stall_ingestion() {
    let env = Arc::new(env_with(SyncSettings { queue_capacity: 4, ..SyncSettings::default() }));
    let pools: Vec<PoolParams> = (0..25u8)
        .map(|i| PoolParams {
            metadata: Some(Anchor { url: format!("https://pool.example/{i}.json"), data_hash: [i; 32].into() }),
            ..pool_params(i)
        })
        .collect();
    let blocks = vec![make_block(1, 200, vec![pool_reg_tx(1, &pools)]), make_block(2, 200, vec![])];

    // Serves the work queue and blocks while the result queue is full.
    let worker = {
        let env = Arc::clone(&env);
        std::thread::spawn(move || {
            for _ in 0..pools.len() {
                let request = loop {
                    match env.queues.pool_work.try_pop() {
                        Some(r) => break r,
                        None => std::thread::sleep(Duration::from_millis(1)),
                    }
                };
                let result = PoolFetchResult::Failed { request, error: "connection refused".into() };
                env.queues.pool_results.push(result).unwrap();
            }
        })
    };

    let (done_tx, done_rx) = mpsc::channel();
    let ingest_env = Arc::clone(&env);
    let first = blocks[0].clone();
    let ingest = std::thread::spawn(move || {
        let mut store = MemoryStore::new();
        let res = insert_block(&ingest_env, &mut store, &first, &ApplyResult::default(), None);
        done_tx.send(()).ok();
        (res.map_err(|e| e.to_string()), store)
    });
    done_rx.recv_timeout(Duration::from_secs(10)).expect("ingestion stalled on the work queue");
    let (res, mut store) = ingest.join().unwrap();
    assert!(matches!(res.unwrap(), BlockOutcome::Inserted { fetches: 25, .. }));

    while !worker.is_finished() {
        env.queues.park_results();
        std::thread::sleep(Duration::from_millis(1));
    }
    worker.join().unwrap();

    insert_block(&env, &mut store, &blocks[1], &ApplyResult::default(), None).unwrap();
    assert_eq!(store.count(Table::OffChainPoolFetchError).unwrap(), 25);
    assert!(env.queues.depths().iter().all(|(_, len)| *len == 0));
}

// ---------------------------------------------------------------------------
// Consumed-output pruning
// ---------------------------------------------------------------------------

#[test]
fn pruning_happens_inside_the_block_that_triggers_it() {
    let env = env_with(SyncSettings {
        security_param: 1,
        tx_out: TxOutOptions { prune: true, ..TxOutOptions::default() },
        ..SyncSettings::default()
    });
    let fund = make_tx(1, vec![], vec![output(0, address(1, None), 10_000_000)], 0);
    let spend = make_tx(2, vec![input(fund.hash, 0)], vec![output(0, address(2, None), 9_800_000)], 200_000);
    let mut blocks = vec![make_block(1, 0, vec![fund.clone()]), make_block(2, 0, vec![spend.clone()])];
    blocks.extend((3..=10).map(|n| make_block(n, 0, vec![])));

    let mut store = MemoryStore::new();
    let outcomes = ingest_all(&env, &mut store, &blocks);
    assert!(outcomes[..9].iter().all(|o| matches!(o, BlockOutcome::Inserted { pruned: 0, .. })));
    // Block 10 is on the prune interval; the cutoff (block 8) is past the spend.
    assert!(matches!(outcomes[9], BlockOutcome::Inserted { pruned: 1, .. }));
    assert!(!store.in_txn());

    let spent = store.lookup(Table::Tx, fund.hash.as_bytes()).unwrap().unwrap();
    let kept = store.lookup(Table::Tx, spend.hash.as_bytes()).unwrap().unwrap();
    assert!(store.find::<TxOutRow>(&keys::pair(spent, 0)).unwrap().is_none());
    assert!(store.find::<TxOutRow>(&keys::pair(kept, 0)).unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Node driver over RocksDB
// ---------------------------------------------------------------------------

#[test]
fn feed_file_ingests_into_rocksdb_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig { data_dir: dir.path().to_path_buf(), ..SyncConfig::default() };
    let feed_path = dir.path().join("feed.jsonl");

    let blocks = sample_chain();
    let mut items: Vec<FeedItem> = blocks
        .iter()
        .map(|b| FeedItem::RollForward { block: b.clone(), apply: ApplyResult::default(), tip: Some(3) })
        .collect();
    items.push(FeedItem::RollBack { point: Some(block_hash(2)) });
    write_feed(std::fs::File::create(&feed_path).unwrap(), &items).unwrap();

    {
        let mut node = SyncNode::open(&config).unwrap();
        let summary = node.run_feed(FeedReader::open(&feed_path).unwrap(), &AtomicBool::new(false)).unwrap();
        assert_eq!((summary.blocks, summary.rollbacks), (3, 1));
        assert!(node.status().index_migrated);
        node.into_store().flush().unwrap();
    }

    let node = SyncNode::open(&config).unwrap();
    assert_eq!(node.store().count(Table::Block).unwrap(), 2);
    assert_eq!(node.status().db_tip.and_then(|t| t.block_no), Some(2));
    assert!(node.status().index_migrated);
}
