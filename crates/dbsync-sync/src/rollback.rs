//! Rollback to an earlier chain point.

use tracing::info;

use dbsync_core::epoch::EpochTracker;
use dbsync_core::error::{LookupError, SyncError};
use dbsync_core::schema::{MinIds, Table};
use dbsync_core::store::DbStore;
use dbsync_core::types::Hash32;

use crate::block::reverse_index;
use crate::consistency::load_db_tip;
use crate::state::SyncEnv;

/// Delete every block after `point` and everything those blocks produced.
/// `None` is the chain origin: the whole chain is removed.
///
/// Returns the number of rows deleted. A point at the DB tip deletes nothing.
pub fn rollback_to<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S, point: Option<Hash32>) -> Result<u64, SyncError> {
    let min_ids = match point {
        None => MinIds(Table::ALL.iter().map(|t| (*t, 1)).collect()),
        Some(hash) => {
            let block_id = store
                .lookup(Table::Block, hash.as_bytes())?
                .ok_or_else(|| LookupError::Block(hash.to_hex()))?;
            let first_deleted = block_id + 1;
            if store.get(Table::Block, first_deleted)?.is_none() {
                info!(point = %hash, "rollback point is the DB tip");
                return Ok(0);
            }
            reverse_index(&*store, first_deleted)?.ok_or_else(|| LookupError::ReverseIndex(hash.to_hex()))?
        }
    };

    store.begin()?;
    let deleted = match store.delete_from(&min_ids) {
        Ok(n) => n,
        Err(err) => {
            store.abort();
            return Err(err.into());
        }
    };
    store.commit()?;

    env.cache.clear();
    env.clear_block_diffs();
    env.state.restore_epoch_tracker(EpochTracker::new());
    let tip = load_db_tip(env, store)?;
    info!(
        point = point.map(|h| h.to_hex()).unwrap_or_else(|| "origin".into()),
        deleted,
        tip = tip.as_ref().and_then(|(_, t)| t.block_no),
        "rolled back"
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dbsync_core::ledger::ApplyResult;
    use dbsync_core::store::MemoryStore;
    use dbsync_core::types::{Block, Era, Hash28, SlotLeader};

    use crate::block::insert_block;
    use crate::state::SyncSettings;

    fn block(seed: u8) -> Block {
        Block {
            hash: Hash32([seed; 32]),
            prev_hash: (seed > 1).then(|| Hash32([seed - 1; 32])),
            era: Era::Shelley,
            slot_no: Some(seed as u64),
            epoch_no: Some(0),
            epoch_slot_no: None,
            block_no: Some(seed as u64),
            time: Utc.timestamp_opt(1_600_000_000 + seed as i64, 0).unwrap(),
            size: 10,
            proto_major: 2,
            proto_minor: 0,
            slot_leader: SlotLeader { hash: Hash28([seed; 28]), pool: None, description: String::new() },
            vrf_key: None,
            op_cert: None,
            op_cert_counter: None,
            txs: vec![],
        }
    }

    fn chain(env: &SyncEnv, store: &mut MemoryStore, len: u8) {
        for seed in 1..=len {
            insert_block(env, store, &block(seed), &ApplyResult::default(), None).unwrap();
        }
    }

    #[test]
    fn rollback_removes_later_blocks() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        chain(&env, &mut store, 4);
        let deleted = rollback_to(&env, &mut store, Some(Hash32([2; 32]))).unwrap();
        assert!(deleted >= 2);
        assert_eq!(store.count(Table::Block).unwrap(), 2);
        assert_eq!(store.count(Table::SlotLeader).unwrap(), 2);
        assert_eq!(env.state.db_tip().unwrap().hash, Hash32([2; 32]));
    }

    #[test]
    fn rollback_to_tip_is_noop() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        chain(&env, &mut store, 3);
        assert_eq!(rollback_to(&env, &mut store, Some(Hash32([3; 32]))).unwrap(), 0);
        assert_eq!(store.count(Table::Block).unwrap(), 3);
    }

    #[test]
    fn rollback_to_origin_empties_store() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        chain(&env, &mut store, 3);
        rollback_to(&env, &mut store, None).unwrap();
        assert_eq!(store.count(Table::Block).unwrap(), 0);
        assert!(env.state.db_tip().is_none());
    }

    #[test]
    fn unknown_point_is_an_error() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        chain(&env, &mut store, 2);
        let err = rollback_to(&env, &mut store, Some(Hash32([9; 32]))).unwrap_err();
        assert!(matches!(err, SyncError::Lookup(LookupError::Block(_))));
    }

    #[test]
    fn rollback_beyond_window_is_refused() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        for seed in 1..=3u8 {
            insert_block(&env, &mut store, &block(seed), &ApplyResult::default(), Some(10_000)).unwrap();
        }
        let err = rollback_to(&env, &mut store, Some(Hash32([1; 32]))).unwrap_err();
        assert!(matches!(err, SyncError::Lookup(LookupError::ReverseIndex(_))));
        assert_eq!(store.count(Table::Block).unwrap(), 3);
    }

    #[test]
    fn reingest_after_rollback_reuses_ids() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        chain(&env, &mut store, 3);
        rollback_to(&env, &mut store, Some(Hash32([1; 32]))).unwrap();
        let outcome = insert_block(&env, &mut store, &block(2), &ApplyResult::default(), None).unwrap();
        assert!(matches!(outcome, crate::block::BlockOutcome::Inserted { block_id: 2, .. }));
    }
}
