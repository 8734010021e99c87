//! Sync driver: startup sequence, feed ingestion, and status snapshots.
//!
//! [`SyncNode`] owns the store and runs on a single thread; everything it
//! shares with concurrent readers lives in the [`SyncEnv`] behind an `Arc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use dbsync_core::constants::NEAR_TIP_BLOCKS;
use dbsync_core::error::{ConfigError, StoreError, SyncError};
use dbsync_core::store::DbStore;
use dbsync_sync::block::{insert_block, BlockOutcome};
use dbsync_sync::cache::{CacheClass, CacheStats};
use dbsync_sync::consistency::{
    check_bootstrap, complete_bootstrap, evaluate_consistency, load_db_tip, load_migration_flags,
    run_fixes_once, run_index_migration_once,
};
use dbsync_sync::rollback::rollback_to;
use dbsync_sync::state::{ConsistencyLevel, DbTip, FixesRan, SyncEnv};

use crate::config::SyncConfig;
use crate::feed::{FeedError, FeedItem};
use crate::storage::RocksStore;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("rpc: {0}")]
    Rpc(String),
}

/// Point-in-time view of the sync state. Reading it never blocks ingestion.
#[derive(Clone, Debug, Serialize)]
pub struct SyncStatus {
    pub consistency: ConsistencyLevel,
    pub db_tip: Option<DbTip>,
    pub bootstrap_active: bool,
    pub index_migrated: bool,
    pub fixes: FixesRan,
    pub queues: Vec<(String, usize)>,
    pub cache: Vec<(String, CacheStats)>,
}

pub fn status(env: &SyncEnv) -> SyncStatus {
    SyncStatus {
        consistency: env.state.consistency(),
        db_tip: env.state.db_tip(),
        bootstrap_active: env.state.bootstrap_active(),
        index_migrated: env.state.index_migrated(),
        fixes: env.state.fixes(),
        queues: env.queues.depths().iter().map(|(name, len)| (name.to_string(), *len)).collect(),
        cache: CacheClass::ALL.iter().map(|c| (format!("{c:?}"), env.cache.stats(*c))).collect(),
    }
}

/// What one feed item did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Block(BlockOutcome),
    RolledBack(u64),
    Bootstrapped(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub blocks: u64,
    pub duplicates: u64,
    pub rollbacks: u64,
    pub stopped: bool,
}

pub struct SyncNode<S> {
    env: Arc<SyncEnv>,
    store: S,
}

impl SyncNode<RocksStore> {
    /// Open the RocksDB store named by `config` and run the startup sequence.
    pub fn open(config: &SyncConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let store = RocksStore::open(config.db_path())?;
        let env = Arc::new(SyncEnv::new(config.sync_settings()));
        Ok(Self::start(env, store)?)
    }
}

impl<S: DbStore> SyncNode<S> {
    /// Run the startup sequence over an opened store.
    ///
    /// A database left mid-bootstrap without the bootstrap flag is fatal.
    pub fn start(env: Arc<SyncEnv>, mut store: S) -> Result<Self, SyncError> {
        load_migration_flags(&env, &store)?;
        let bootstrap = check_bootstrap(&env, &mut store)?;
        run_fixes_once(&env, &mut store)?;
        let tip = load_db_tip(&env, &store)?;
        info!(
            bootstrap,
            tip = tip.as_ref().and_then(|(_, t)| t.block_no),
            prune = env.state.migration().prune_tx_out,
            skip_tx_in = env.state.migration().skip_tx_in,
            "sync node started"
        );
        Ok(Self { env, store })
    }

    pub fn env(&self) -> &Arc<SyncEnv> {
        &self.env
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status(&self) -> SyncStatus {
        status(&self.env)
    }

    /// Apply one feed item.
    pub fn apply(&mut self, item: FeedItem) -> Result<ItemOutcome, SyncError> {
        match item {
            FeedItem::RollForward { block, apply, tip } => {
                let outcome = insert_block(&self.env, &mut self.store, &block, &apply, tip)?;
                if let (Some(tip), Some(block_no)) = (tip, block.block_no) {
                    if tip.saturating_sub(block_no) <= NEAR_TIP_BLOCKS {
                        run_index_migration_once(&self.env, &mut self.store)?;
                    }
                    if block_no >= tip {
                        evaluate_consistency(&self.env, &self.store, Some((block_no, block.hash)))?;
                    } else {
                        self.env.state.set_consistency(ConsistencyLevel::DbBehindChain);
                    }
                }
                Ok(ItemOutcome::Block(outcome))
            }
            FeedItem::RollBack { point } => {
                let deleted = rollback_to(&self.env, &mut self.store, point)?;
                Ok(ItemOutcome::RolledBack(deleted))
            }
            FeedItem::BootstrapUtxo { utxo } => {
                let inserted = complete_bootstrap(&self.env, &mut self.store, &utxo)?;
                Ok(ItemOutcome::Bootstrapped(inserted))
            }
        }
    }

    /// Ingest a feed until it ends or `stop` is raised. Stopping only
    /// happens between items.
    pub fn run_feed<I>(&mut self, feed: I, stop: &AtomicBool) -> Result<FeedSummary, NodeError>
    where
        I: IntoIterator<Item = Result<FeedItem, FeedError>>,
    {
        let mut summary = FeedSummary::default();
        for item in feed {
            if stop.load(Ordering::Acquire) {
                warn!("stop requested; leaving feed");
                summary.stopped = true;
                break;
            }
            match self.apply(item?)? {
                ItemOutcome::Block(BlockOutcome::Inserted { .. }) => summary.blocks += 1,
                ItemOutcome::Block(BlockOutcome::Duplicate(_)) => summary.duplicates += 1,
                ItemOutcome::RolledBack(_) => summary.rollbacks += 1,
                ItemOutcome::Bootstrapped(_) => {}
            }
        }
        info!(blocks = summary.blocks, duplicates = summary.duplicates, rollbacks = summary.rollbacks, "feed done");
        Ok(summary)
    }

    /// Give the store back, e.g. to flush it on shutdown.
    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dbsync_core::ledger::ApplyResult;
    use dbsync_core::options::TxOutOptions;
    use dbsync_core::schema::Table;
    use dbsync_core::store::MemoryStore;
    use dbsync_core::types::{Block, Era, Hash28, Hash32, SlotLeader};
    use dbsync_sync::state::SyncSettings;

    fn block(seed: u8) -> Block {
        Block {
            hash: Hash32([seed; 32]),
            prev_hash: (seed > 1).then(|| Hash32([seed - 1; 32])),
            era: Era::Babbage,
            slot_no: Some(seed as u64),
            epoch_no: Some(3),
            epoch_slot_no: None,
            block_no: Some(seed as u64),
            time: Utc.timestamp_opt(1_700_000_000 + seed as i64, 0).unwrap(),
            size: 64,
            proto_major: 8,
            proto_minor: 0,
            slot_leader: SlotLeader { hash: Hash28([1; 28]), pool: None, description: String::new() },
            vrf_key: None,
            op_cert: None,
            op_cert_counter: None,
            txs: vec![],
        }
    }

    fn forward(seed: u8, tip: u64) -> Result<FeedItem, FeedError> {
        Ok(FeedItem::RollForward { block: block(seed), apply: ApplyResult::default(), tip: Some(tip) })
    }

    fn node() -> SyncNode<MemoryStore> {
        SyncNode::start(Arc::new(SyncEnv::new(SyncSettings::default())), MemoryStore::new()).unwrap()
    }

    #[test]
    fn feed_reaches_tip_and_migrates_indexes() {
        let mut node = node();
        let feed = vec![forward(1, 3), forward(2, 3), forward(3, 3)];
        let summary = node.run_feed(feed, &AtomicBool::new(false)).unwrap();
        assert_eq!(summary.blocks, 3);
        let status = node.status();
        assert_eq!(status.consistency, ConsistencyLevel::Consistent);
        assert!(status.index_migrated);
        assert_eq!(status.db_tip.unwrap().block_no, Some(3));
    }

    #[test]
    fn far_from_tip_is_behind() {
        let mut node = node();
        node.run_feed(vec![forward(1, 1_000)], &AtomicBool::new(false)).unwrap();
        assert_eq!(node.status().consistency, ConsistencyLevel::DbBehindChain);
        assert!(!node.status().index_migrated);
    }

    #[test]
    fn replayed_block_counts_as_duplicate() {
        let mut node = node();
        let summary = node.run_feed(vec![forward(1, 5), forward(1, 5)], &AtomicBool::new(false)).unwrap();
        assert_eq!((summary.blocks, summary.duplicates), (1, 1));
    }

    #[test]
    fn stop_flag_halts_between_items() {
        let mut node = node();
        let summary = node.run_feed(vec![forward(1, 5)], &AtomicBool::new(true)).unwrap();
        assert!(summary.stopped);
        assert_eq!(node.store().count(Table::Block).unwrap(), 0);
    }

    #[test]
    fn mid_bootstrap_without_flag_is_fatal() {
        let env = Arc::new(SyncEnv::new(SyncSettings {
            tx_out: TxOutOptions { bootstrap: true, ..TxOutOptions::default() },
            ..SyncSettings::default()
        }));
        let node = SyncNode::start(env, MemoryStore::new()).unwrap();
        assert!(node.status().bootstrap_active);
        let store = node.into_store();

        let err = SyncNode::start(Arc::new(SyncEnv::new(SyncSettings::default())), store).err().unwrap();
        assert!(matches!(err, SyncError::Consistency(_)));
    }
}
