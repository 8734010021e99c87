//! Bootstrap state, one-time migration guards, and the tip consistency check.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use dbsync_core::constants::BOOTSTRAP_META_KEY;
use dbsync_core::error::{ConsistencyError, LookupError, SyncError};
use dbsync_core::schema::{keys, BlockRow, DbId, Table};
use dbsync_core::store::{DbStore, DbStoreExt, MigrationKind};
use dbsync_core::types::{Hash32, TxOut};

use crate::state::{ConsistencyLevel, DbTip, FixesRan, SyncEnv};
use crate::tx::insert_output_now;

/// Durable bootstrap phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    InProgress,
    Done,
}

impl BootstrapState {
    fn marker(&self) -> &'static [u8] {
        match self {
            BootstrapState::NotStarted => b"not_started",
            BootstrapState::InProgress => b"in_progress",
            BootstrapState::Done => b"done",
        }
    }

    fn parse(raw: &[u8]) -> Result<Self, ConsistencyError> {
        match raw {
            b"not_started" => Ok(BootstrapState::NotStarted),
            b"in_progress" => Ok(BootstrapState::InProgress),
            b"done" => Ok(BootstrapState::Done),
            other => Err(ConsistencyError::UnknownBootstrapState(String::from_utf8_lossy(other).into_owned())),
        }
    }
}

pub fn read_bootstrap_state<S: DbStore + ?Sized>(store: &S) -> Result<BootstrapState, SyncError> {
    match store.get_meta(BOOTSTRAP_META_KEY)? {
        None => Ok(BootstrapState::NotStarted),
        Some(raw) => Ok(BootstrapState::parse(&raw)?),
    }
}

fn write_bootstrap_state<S: DbStore + ?Sized>(store: &mut S, state: BootstrapState) -> Result<(), SyncError> {
    store.set_meta(BOOTSTRAP_META_KEY, state.marker())?;
    Ok(())
}

/// Reconcile the bootstrap flag with the durable bootstrap state and set
/// the derived in-memory flag.
///
/// Bootstrap only starts on an empty database; a flag given later is
/// ignored. A database left mid-bootstrap without the flag is fatal.
pub fn check_bootstrap<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S) -> Result<bool, SyncError> {
    let durable = read_bootstrap_state(store)?;
    let requested = env.tx_out.bootstrap;
    let active = match (durable, requested) {
        (BootstrapState::InProgress, false) => {
            error!("database is mid-bootstrap but bootstrap is not enabled");
            return Err(ConsistencyError::BootstrapFlagMissing.into());
        }
        (BootstrapState::InProgress, true) => true,
        (BootstrapState::NotStarted, true) => {
            if store.count(Table::Block)? == 0 {
                write_bootstrap_state(store, BootstrapState::InProgress)?;
                info!("starting bootstrap: UTxO population deferred until tip");
                true
            } else {
                info!("bootstrap requested on a non-empty database; ignoring");
                false
            }
        }
        (BootstrapState::NotStarted | BootstrapState::Done, _) => false,
    };
    env.state.set_bootstrap_active(active);
    env.refresh_migration();
    Ok(active)
}

/// An unspent output handed over by the ledger when bootstrap reaches the tip.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BootstrapUtxo {
    pub tx_hash: Hash32,
    pub output: TxOut,
}

/// Insert the ledger UTxO set and end bootstrap. Returns the outputs
/// inserted.
pub fn complete_bootstrap<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    utxo: &[BootstrapUtxo],
) -> Result<u64, SyncError> {
    if !env.state.bootstrap_active() || read_bootstrap_state(store)? != BootstrapState::InProgress {
        return Err(ConsistencyError::NoBootstrapInProgress.into());
    }
    store.begin()?;
    match insert_utxo(env, store, utxo) {
        Ok(count) => {
            store.commit()?;
            env.state.set_bootstrap_active(false);
            env.refresh_migration();
            info!(outputs = count, "bootstrap complete");
            Ok(count)
        }
        Err(err) => {
            store.abort();
            env.cache.clear();
            Err(err)
        }
    }
}

fn insert_utxo<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S, utxo: &[BootstrapUtxo]) -> Result<u64, SyncError> {
    let mut count = 0;
    for entry in utxo {
        let tx_id = store
            .lookup(Table::Tx, entry.tx_hash.as_bytes())?
            .ok_or_else(|| LookupError::Tx(entry.tx_hash.to_hex()))?;
        insert_output_now(env, store, tx_id, &entry.output)?;
        count += 1;
    }
    write_bootstrap_state(store, BootstrapState::Done)?;
    Ok(count)
}

/// Run the index migration unless it already ran. Only the flag transition
/// is guarded; the migration itself is the store's business.
pub fn run_index_migration_once<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S) -> Result<bool, SyncError> {
    if env.state.index_migrated() {
        return Ok(false);
    }
    if store.get_meta(MigrationKind::CreateIndexes.marker())?.is_none() {
        info!("creating indexes");
        store.run_migration(MigrationKind::CreateIndexes)?;
        info!("indexes created");
    }
    env.state.set_index_migrated();
    Ok(true)
}

/// Apply the data fixes once. The flag is set only after the migration
/// succeeded.
pub fn run_fixes_once<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S) -> Result<bool, SyncError> {
    if env.state.fixes() == FixesRan::DataFixRan {
        return Ok(false);
    }
    if store.get_meta(MigrationKind::DataFixes.marker())?.is_none() {
        info!("running data fixes");
        store.run_migration(MigrationKind::DataFixes)?;
    }
    env.state.set_fixes(FixesRan::DataFixRan);
    Ok(true)
}

/// Load the migration flags that already ran from their durable markers.
pub fn load_migration_flags<S: DbStore + ?Sized>(env: &SyncEnv, store: &S) -> Result<(), SyncError> {
    if store.get_meta(MigrationKind::CreateIndexes.marker())?.is_some() {
        env.state.set_index_migrated();
    }
    if store.get_meta(MigrationKind::DataFixes.marker())?.is_some() {
        env.state.set_fixes(FixesRan::DataFixRan);
    }
    Ok(())
}

/// Read the latest stored block into the state's DB tip.
pub fn load_db_tip<S: DbStore + ?Sized>(env: &SyncEnv, store: &S) -> Result<Option<(DbId, DbTip)>, SyncError> {
    let tip = match store.latest_block()? {
        Some((id, row)) => {
            let row = BlockRow::try_from(row)?;
            Some((id, DbTip { hash: row.hash, block_no: row.block_no, slot_no: row.slot_no, epoch_no: row.epoch_no }))
        }
        None => None,
    };
    env.state.set_db_tip(tip.as_ref().map(|(_, t)| t.clone()));
    Ok(tip)
}

/// Compare the DB tip with the chain tip and record the verdict.
pub fn evaluate_consistency<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &S,
    chain_tip: Option<(u64, Hash32)>,
) -> Result<ConsistencyLevel, SyncError> {
    let db_tip = load_db_tip(env, store)?.map(|(_, t)| t);
    let level = match (db_tip, chain_tip) {
        (_, None) => ConsistencyLevel::Unchecked,
        (None, Some(_)) => ConsistencyLevel::DbBehindChain,
        (Some(db), Some((chain_no, chain_hash))) => {
            if db.hash == chain_hash {
                ConsistencyLevel::Consistent
            } else if store.lookup(Table::Block, chain_hash.as_bytes())?.is_some() {
                ConsistencyLevel::DbAheadOfChain
            } else if db.block_no.is_some_and(|n| n > chain_no) {
                ConsistencyLevel::DbAheadOfChain
            } else {
                ConsistencyLevel::DbBehindChain
            }
        }
    };
    env.state.set_consistency(level);
    Ok(level)
}

/// Block id stored under a height, if any.
pub fn block_id_at<S: DbStore + ?Sized>(store: &S, block_no: u64) -> Result<Option<DbId>, SyncError> {
    Ok(store.find::<BlockRow>(&keys::block_no(block_no))?)
}
