//! Process-wide sync state and the context handed to every ingestion call.
//!
//! Each field of [`SyncState`] is its own synchronized cell. Readers (status
//! queries) may run concurrently with ingestion; no operation locks two
//! cells at once, so invariants spanning cells are kept by write order.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use dbsync_core::constants::{DEFAULT_REVERSE_INDEX_WINDOW, DEFAULT_SECURITY_PARAM, QUEUE_CAPACITY};
use dbsync_core::epoch::{EpochEvent, EpochTracker};
use dbsync_core::ledger::ProtocolParams;
use dbsync_core::options::{prune_interval, safe_block_diff, InsertOptions, PruneConsumeMigration, TxOutOptions};
use dbsync_core::types::{Hash32, Network};

use crate::cache::{CacheSizes, EntityCache};
use crate::queue::OffChainQueues;

/// How the DB tip relates to the chain tip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    #[default]
    Unchecked,
    Consistent,
    DbAheadOfChain,
    DbBehindChain,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixesRan {
    #[default]
    NoneRan,
    DataFixRan,
}

/// Latest block committed to the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DbTip {
    pub hash: Hash32,
    pub block_no: Option<u64>,
    pub slot_no: Option<u64>,
    pub epoch_no: Option<u64>,
}

#[derive(Default)]
pub struct SyncState {
    consistency: RwLock<ConsistencyLevel>,
    fixes: RwLock<FixesRan>,
    index_migrated: AtomicBool,
    bootstrap_active: AtomicBool,
    migration: RwLock<PruneConsumeMigration>,
    epoch: Mutex<EpochTracker>,
    params: RwLock<Option<ProtocolParams>>,
    db_tip: RwLock<Option<DbTip>>,
}

impl SyncState {
    pub fn consistency(&self) -> ConsistencyLevel {
        *self.consistency.read()
    }

    pub fn set_consistency(&self, level: ConsistencyLevel) {
        *self.consistency.write() = level;
    }

    pub fn fixes(&self) -> FixesRan {
        *self.fixes.read()
    }

    pub fn set_fixes(&self, fixes: FixesRan) {
        *self.fixes.write() = fixes;
    }

    pub fn index_migrated(&self) -> bool {
        self.index_migrated.load(Ordering::Acquire)
    }

    pub fn set_index_migrated(&self) {
        self.index_migrated.store(true, Ordering::Release);
    }

    pub fn bootstrap_active(&self) -> bool {
        self.bootstrap_active.load(Ordering::Acquire)
    }

    pub fn set_bootstrap_active(&self, active: bool) {
        self.bootstrap_active.store(active, Ordering::Release);
    }

    pub fn migration(&self) -> PruneConsumeMigration {
        *self.migration.read()
    }

    pub fn set_migration(&self, migration: PruneConsumeMigration) {
        *self.migration.write() = migration;
    }

    /// Feed a block's epoch to the tracker.
    pub fn observe_epoch(&self, epoch_no: u64) -> Option<EpochEvent> {
        self.epoch.lock().observe(epoch_no)
    }

    pub fn epoch_tracker(&self) -> EpochTracker {
        *self.epoch.lock()
    }

    pub fn restore_epoch_tracker(&self, tracker: EpochTracker) {
        *self.epoch.lock() = tracker;
    }

    pub fn params(&self) -> Option<ProtocolParams> {
        self.params.read().clone()
    }

    pub fn set_params(&self, params: ProtocolParams) {
        *self.params.write() = Some(params);
    }

    pub fn db_tip(&self) -> Option<DbTip> {
        self.db_tip.read().clone()
    }

    pub fn set_db_tip(&self, tip: Option<DbTip>) {
        *self.db_tip.write() = tip;
    }
}

/// Per-block aggregate kept for epoch-row folding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDiff {
    pub epoch_no: u64,
    pub fees: u128,
    pub out_sum: u128,
    pub tx_count: u64,
    pub time: i64,
    /// The block was seen crossing into its epoch, so the epoch's diffs are
    /// complete from here on.
    pub opens_epoch: bool,
}

/// Construction parameters of a [`SyncEnv`].
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub network: Network,
    pub security_param: u64,
    pub options: InsertOptions,
    pub tx_out: TxOutOptions,
    pub cache_sizes: CacheSizes,
    pub epoch_cache: bool,
    pub reverse_index_window: u64,
    pub queue_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            security_param: DEFAULT_SECURITY_PARAM,
            options: InsertOptions::default(),
            tx_out: TxOutOptions::default(),
            cache_sizes: CacheSizes::default(),
            epoch_cache: true,
            reverse_index_window: DEFAULT_REVERSE_INDEX_WINDOW,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

/// The sync context: configuration-derived gating plus all shared state.
pub struct SyncEnv {
    pub network: Network,
    pub security_param: u64,
    pub options: InsertOptions,
    pub tx_out: TxOutOptions,
    pub reverse_index_window: u64,
    pub state: SyncState,
    pub cache: EntityCache,
    pub queues: OffChainQueues,
    block_diffs: Option<Mutex<Vec<BlockDiff>>>,
}

impl SyncEnv {
    pub fn new(settings: SyncSettings) -> Self {
        let state = SyncState::default();
        state.set_migration(PruneConsumeMigration::from_options(&settings.tx_out, false));
        Self {
            network: settings.network,
            security_param: settings.security_param,
            options: settings.options,
            tx_out: settings.tx_out,
            reverse_index_window: settings.reverse_index_window,
            state,
            cache: EntityCache::new(settings.cache_sizes),
            queues: OffChainQueues::new(settings.queue_capacity),
            block_diffs: settings.epoch_cache.then(|| Mutex::new(Vec::new())),
        }
    }

    /// Recompute the prune/consume policy after the bootstrap flag changed.
    pub fn refresh_migration(&self) {
        let m = PruneConsumeMigration::from_options(&self.tx_out, self.state.bootstrap_active());
        self.state.set_migration(m);
    }

    pub fn safe_block_diff(&self) -> u64 {
        safe_block_diff(self.security_param)
    }

    pub fn prune_interval(&self) -> u64 {
        prune_interval(self.security_param)
    }

    pub fn epoch_cache_enabled(&self) -> bool {
        self.block_diffs.is_some()
    }

    pub fn record_block_diff(&self, diff: BlockDiff) {
        if let Some(diffs) = &self.block_diffs {
            diffs.lock().push(diff);
        }
    }

    /// Remove and return the recorded diffs of one epoch.
    pub fn take_block_diffs(&self, epoch_no: u64) -> Vec<BlockDiff> {
        let Some(diffs) = &self.block_diffs else {
            return Vec::new();
        };
        let mut diffs = diffs.lock();
        let (taken, kept) = diffs.drain(..).partition(|d| d.epoch_no == epoch_no);
        *diffs = kept;
        taken
    }

    pub fn clear_block_diffs(&self) {
        if let Some(diffs) = &self.block_diffs {
            diffs.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(epoch_no: u64) -> BlockDiff {
        BlockDiff { epoch_no, fees: 1, out_sum: 2, tx_count: 1, time: 0, opens_epoch: false }
    }

    #[test]
    fn bootstrap_flag_feeds_migration() {
        let env = SyncEnv::new(SyncSettings::default());
        assert!(!env.state.migration().prune_tx_out);
        env.state.set_bootstrap_active(true);
        env.refresh_migration();
        assert!(env.state.migration().prune_tx_out);
        assert!(env.state.migration().skip_tx_in);
    }

    #[test]
    fn block_diffs_taken_per_epoch() {
        let env = SyncEnv::new(SyncSettings::default());
        env.record_block_diff(diff(1));
        env.record_block_diff(diff(1));
        env.record_block_diff(diff(2));
        assert_eq!(env.take_block_diffs(1).len(), 2);
        assert_eq!(env.take_block_diffs(1).len(), 0);
        assert_eq!(env.take_block_diffs(2).len(), 1);
    }

    #[test]
    fn disabled_epoch_cache_records_nothing() {
        let env = SyncEnv::new(SyncSettings { epoch_cache: false, ..SyncSettings::default() });
        env.record_block_diff(diff(1));
        assert!(env.take_block_diffs(1).is_empty());
    }

    #[test]
    fn flags_are_independent_cells() {
        let state = SyncState::default();
        assert_eq!(state.consistency(), ConsistencyLevel::Unchecked);
        state.set_fixes(FixesRan::DataFixRan);
        assert_eq!(state.consistency(), ConsistencyLevel::Unchecked);
        assert!(!state.index_migrated());
        state.set_index_migrated();
        assert!(state.index_migrated());
    }
}
