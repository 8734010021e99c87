//! Shared builders for integration tests.

use chrono::{DateTime, TimeZone, Utc};

use dbsync_core::certs::{Certificate, PoolParams, TxCertificate};
use dbsync_core::gov::{Anchor, GovAction, GovActionId, ProposalProcedure};
use dbsync_core::ledger::ApplyResult;
use dbsync_core::store::{DbStore, MemoryStore};
use dbsync_core::schema::{DbId, DbRow, Table};
use dbsync_core::types::{
    Address, Block, Credential, Era, Hash28, Hash32, Network, Rational, SlotLeader, StakeAddress, Tx, TxIn, TxOut,
};
use dbsync_sync::block::{insert_block, BlockOutcome};
use dbsync_sync::cache::CacheSizes;
use dbsync_sync::state::{SyncEnv, SyncSettings};

/// Hash of block `n`.
pub fn block_hash(n: u64) -> Hash32 {
    let mut bytes = [0xB0; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    Hash32(bytes)
}

/// Deterministic transaction hash from a seed.
pub fn tx_hash(seed: u64) -> Hash32 {
    let mut bytes = [0x7A; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    Hash32(bytes)
}

pub fn block_time(n: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + n as i64 * 20, 0).single().unwrap_or_default()
}

pub fn stake(seed: u8) -> StakeAddress {
    StakeAddress { network: Network::Testnet, credential: Credential::KeyHash(Hash28([seed; 28])) }
}

/// Base address with payment key `seed`, delegating to `stake`.
pub fn address(seed: u8, stake: Option<StakeAddress>) -> Address {
    let mut raw = vec![0x00, seed];
    if let Some(s) = &stake {
        raw.extend_from_slice(s.credential.hash().as_bytes());
    }
    Address {
        view: format!("addr_test:{}", raw.iter().map(|b| format!("{b:02x}")).collect::<String>()),
        raw,
        payment: Some(Credential::KeyHash(Hash28([seed; 28]))),
        stake,
    }
}

pub fn output(index: u64, address: Address, value: u64) -> TxOut {
    TxOut { index, address, value, assets: vec![], datum: None, reference_script: None }
}

pub fn input(tx: Hash32, index: u64) -> TxIn {
    TxIn { tx_hash: tx, index, redeemer_index: None }
}

/// Transaction with the given inputs and outputs and an explicit fee.
pub fn make_tx(seed: u64, inputs: Vec<TxIn>, outputs: Vec<TxOut>, fee: u64) -> Tx {
    Tx { hash: tx_hash(seed), size: 300, fees: Some(fee), inputs, outputs, ..Tx::default() }
}

pub fn cert(index: u16, cert: Certificate) -> TxCertificate {
    TxCertificate { index, redeemer_index: None, cert }
}

pub fn pool_params(seed: u8) -> PoolParams {
    PoolParams {
        pool: Hash28([seed; 28]),
        vrf_key_hash: Hash32([seed; 32]),
        pledge: 1_000_000_000,
        cost: 340_000_000,
        margin: Rational { numerator: 1, denominator: 100 },
        reward_account: stake(seed),
        owners: vec![stake(seed)],
        relays: vec![],
        metadata: None,
    }
}

pub fn anchor(seed: u8) -> Anchor {
    Anchor { url: format!("https://gov.example/{seed}.json"), data_hash: Hash32([seed; 32]) }
}

/// Hard-fork proposal building on `prev`.
pub fn hard_fork(prev: Option<GovActionId>, major: u16) -> ProposalProcedure {
    ProposalProcedure {
        deposit: 100_000_000_000,
        return_address: stake(0xEE),
        action: GovAction::HardForkInitiation { prev, major, minor: 0 },
        anchor: anchor(major as u8),
    }
}

/// Block `n` in `epoch`, chained to block `n - 1` (block 1 has no parent).
pub fn make_block(n: u64, epoch: u64, txs: Vec<Tx>) -> Block {
    let txs = txs
        .into_iter()
        .enumerate()
        .map(|(i, tx)| Tx { block_index: i as u64, ..tx })
        .collect();
    Block {
        hash: block_hash(n),
        prev_hash: (n > 1).then(|| block_hash(n - 1)),
        era: Era::Conway,
        slot_no: Some(n * 20),
        epoch_no: Some(epoch),
        epoch_slot_no: Some(n * 20 % 432_000),
        block_no: Some(n),
        time: block_time(n),
        size: 1_024,
        proto_major: 9,
        proto_minor: 0,
        slot_leader: SlotLeader { hash: Hash28([0x5E; 28]), pool: None, description: String::new() },
        vrf_key: None,
        op_cert: None,
        op_cert_counter: None,
        txs,
    }
}

pub fn env() -> SyncEnv {
    SyncEnv::new(SyncSettings::default())
}

pub fn env_with(settings: SyncSettings) -> SyncEnv {
    SyncEnv::new(settings)
}

/// Environment with every entity cache turned off.
pub fn uncached_env() -> SyncEnv {
    SyncEnv::new(SyncSettings { cache_sizes: CacheSizes::disabled(), ..SyncSettings::default() })
}

/// Insert blocks in order with no ledger data, failing on the first error.
pub fn ingest_all<S: DbStore>(env: &SyncEnv, store: &mut S, blocks: &[Block]) -> Vec<BlockOutcome> {
    blocks
        .iter()
        .map(|b| insert_block(env, store, b, &ApplyResult::default(), None).unwrap())
        .collect()
}

/// Every row of every table, for comparing two stores.
pub fn dump(store: &MemoryStore) -> Vec<(Table, Vec<(DbId, DbRow)>)> {
    Table::ALL
        .iter()
        .map(|t| (*t, store.scan(*t, 1).unwrap()))
        .filter(|(_, rows)| !rows.is_empty())
        .collect()
}
