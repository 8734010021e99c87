//! Block ingestion pipeline.
//!
//! Each block is one store transaction: everything it produces is committed
//! together or not at all. On failure the store is rolled back, the entity
//! cache is cleared (it may hold ids of rows that no longer exist) and the
//! epoch tracker is restored, so the same block can be retried. Off-chain
//! fetch requests are queued after the commit; a failure there is logged
//! and never fails the committed block.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use dbsync_core::constants::{LOG_INTERVAL_BLOCKS, NEAR_TIP_BLOCKS};
use dbsync_core::epoch::EpochEvent;
use dbsync_core::error::{LookupError, SyncError};
use dbsync_core::ledger::ApplyResult;
use dbsync_core::schema::{keys, BlockRow, DbId, MinIds, ReverseIndexRow, SlotLeaderRow, Table};
use dbsync_core::store::{DbStore, DbStoreExt};
use dbsync_core::types::{Block, Hash28};

use crate::batch::GroupedBatch;
use crate::cache::{CacheAction, CacheClass};
use crate::entities;
use crate::epoch::{insert_new_epoch, insert_stake_slice};
use crate::offchain::{insert_pool_result, insert_vote_result, FetchRequest};
use crate::state::{BlockDiff, DbTip, SyncEnv};
use crate::tx::insert_tx;

/// Working state of the block being ingested.
pub struct BlockCtx<'a> {
    pub env: &'a SyncEnv,
    pub block: &'a Block,
    pub apply: &'a ApplyResult,
    pub block_id: DbId,
    pub epoch_no: u64,
    pub slot_no: u64,
    pub batch: GroupedBatch,
    /// Pools registered earlier in this block.
    pub pools_registered: HashSet<Hash28>,
    /// Off-chain fetches to queue once the block is committed.
    pub fetches: Vec<FetchRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    Inserted { block_id: DbId, txs: usize, fetches: usize, pruned: u64 },
    /// The block hash is already stored; nothing was written.
    Duplicate(DbId),
}

/// What a committed block leaves behind for the post-commit steps.
struct Ingested {
    block_id: DbId,
    txs: usize,
    pruned: u64,
    fetches: Vec<FetchRequest>,
    diff: BlockDiff,
}

/// Ingest one block. `tip_block_no` is the chain tip height when known.
pub fn insert_block<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    block: &Block,
    apply: &ApplyResult,
    tip_block_no: Option<u64>,
) -> Result<BlockOutcome, SyncError> {
    if let Some(id) = store.lookup(Table::Block, block.hash.as_bytes())? {
        debug!(hash = %block.hash, "block already stored");
        return Ok(BlockOutcome::Duplicate(id));
    }

    let tracker = env.state.epoch_tracker();
    store.begin()?;
    let ingested = match ingest(env, store, block, apply, tip_block_no).and_then(|i| {
        store.commit()?;
        Ok(i)
    }) {
        Ok(ingested) => ingested,
        Err(err) => {
            store.abort();
            env.cache.clear();
            env.state.restore_epoch_tracker(tracker);
            let err = err.in_block(block.label(), block.era, "insert_block");
            tracing::error!(error = %err, "block ingestion failed");
            return Err(err);
        }
    };

    env.record_block_diff(ingested.diff);
    env.state.set_db_tip(Some(DbTip {
        hash: block.hash,
        block_no: block.block_no,
        slot_no: block.slot_no,
        epoch_no: block.epoch_no,
    }));

    let mut fetches = 0;
    for request in ingested.fetches {
        match env.queues.queue_fetch(request) {
            Ok(()) => fetches += 1,
            Err(err) => warn!(hash = %block.hash, error = %err, "dropped off-chain fetch request"),
        }
    }

    Ok(BlockOutcome::Inserted { block_id: ingested.block_id, txs: ingested.txs, fetches, pruned: ingested.pruned })
}

fn ingest<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    block: &Block,
    apply: &ApplyResult,
    tip_block_no: Option<u64>,
) -> Result<Ingested, SyncError> {
    let before = store.next_ids();
    let wrap = |routine: &'static str| move |e: SyncError| e.in_block(block.label(), block.era, routine);

    let previous_id = match &block.prev_hash {
        Some(prev) => Some(
            env.cache
                .resolve(store, CacheClass::Block, prev.as_bytes(), CacheAction::Cache)?
                .ok_or_else(|| LookupError::PreviousBlock(prev.to_hex()))
                .map_err(SyncError::from)
                .map_err(wrap("insert_block"))?,
        ),
        None => None,
    };

    let pool_hash_id = match &block.slot_leader.pool {
        Some(pool) => Some(entities::pool_id(&env.cache, store, pool)?),
        None => None,
    };
    let slot_leader_id = store.insert_row_checked(SlotLeaderRow {
        hash: block.slot_leader.hash,
        pool_hash_id,
        description: block.slot_leader.description.clone(),
    })?;

    let block_id = store.insert_row(BlockRow {
        hash: block.hash,
        epoch_no: block.epoch_no,
        slot_no: block.slot_no,
        epoch_slot_no: block.epoch_slot_no,
        block_no: block.block_no,
        previous_id,
        slot_leader_id,
        size: block.size,
        time: block.time.timestamp(),
        tx_count: block.txs.len() as u64,
        proto_major: block.proto_major,
        proto_minor: block.proto_minor,
        vrf_key: block.vrf_key.clone(),
        op_cert: block.op_cert,
        op_cert_counter: block.op_cert_counter,
        era: block.era,
    })?;
    env.cache.put(CacheClass::Block, block.hash.to_vec(), block_id);

    let event = block.epoch_no.and_then(|e| env.state.observe_epoch(e));
    let mut ctx = BlockCtx {
        env,
        block,
        apply,
        block_id,
        epoch_no: block.epoch_no.or(env.state.epoch_tracker().last()).unwrap_or(0),
        slot_no: block.slot_no.unwrap_or(0),
        batch: GroupedBatch::new(),
        pools_registered: HashSet::new(),
        fetches: Vec::new(),
    };

    let mut fees = 0u128;
    let mut out_sum = 0u128;
    for tx in &block.txs {
        let summary = insert_tx(&mut ctx, store, tx).map_err(wrap("insert_tx"))?;
        fees += summary.fee as u128;
        out_sum += summary.out_sum;
    }

    let batch = std::mem::take(&mut ctx.batch);
    let stats = batch.flush(store).map_err(SyncError::from).map_err(wrap("insert_grouped_batch"))?;
    debug!(?stats, "grouped batch flushed");

    let opens_epoch = match event {
        Some(EpochEvent::New(_)) => true,
        Some(EpochEvent::Start(_)) => block.prev_hash.is_none(),
        None => false,
    };
    let diff = BlockDiff {
        epoch_no: ctx.epoch_no,
        fees,
        out_sum,
        tx_count: block.txs.len() as u64,
        time: block.time.timestamp(),
        opens_epoch,
    };

    let near_window = |window: u64| match (tip_block_no, block.block_no) {
        (Some(tip), Some(no)) => tip.saturating_sub(no) <= window,
        _ => true,
    };
    if near_window(env.reverse_index_window) {
        store.insert_row(ReverseIndexRow { block_id, min_ids: before.clone() })?;
    }

    log_block(block, tip_block_no, event, near_window(NEAR_TIP_BLOCKS));

    if let Some(new_epoch) = &apply.new_epoch {
        insert_new_epoch(&mut ctx, store, new_epoch).map_err(wrap("insert_epoch"))?;
    }
    if env.options.use_ledger_data {
        if let Some(slice) = &apply.stake_slice {
            insert_stake_slice(&ctx, store, slice).map_err(wrap("insert_stake_slice"))?;
        }
    }

    drain_offchain_results(env, store).map_err(wrap("insert_offchain_results"))?;

    let pruned = match block.block_no {
        Some(no) => prune_consumed(env, store, no).map_err(wrap("prune_consumed"))?,
        None => 0,
    };

    Ok(Ingested { block_id, txs: block.txs.len(), pruned, fetches: ctx.fetches, diff })
}

fn log_block(block: &Block, tip_block_no: Option<u64>, event: Option<EpochEvent>, near_tip: bool) {
    let block_no = block.block_no.unwrap_or(0);
    let on_boundary = block_no % LOG_INTERVAL_BLOCKS == 0 || matches!(event, Some(EpochEvent::New(_)));
    if near_tip || on_boundary {
        info!(
            block_no,
            slot = block.slot_no,
            epoch = block.epoch_no,
            hash = %block.hash,
            tip = tip_block_no,
            txs = block.txs.len(),
            "insert block"
        );
    } else {
        debug!(block_no, slot = block.slot_no, hash = %block.hash, "insert block");
    }
}

fn drain_offchain_results<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S) -> Result<(), SyncError> {
    if env.options.offchain_pool_data {
        for result in env.queues.take_pool_results() {
            insert_pool_result(store, result)?;
        }
    }
    if env.options.governance {
        for result in env.queues.take_vote_results() {
            insert_vote_result(store, result)?;
        }
    }
    Ok(())
}

/// Every prune interval, delete outputs consumed by transactions older than
/// the safe distance from this block. Runs inside the block's transaction.
pub fn prune_consumed<S: DbStore + ?Sized>(env: &SyncEnv, store: &mut S, block_no: u64) -> Result<u64, SyncError> {
    let migration = env.state.migration();
    let interval = env.prune_interval();
    if !migration.prune_tx_out || block_no == 0 || interval == 0 || block_no % interval != 0 {
        return Ok(0);
    }
    let Some(cutoff) = block_no.checked_sub(env.safe_block_diff()) else {
        return Ok(0);
    };
    let before_tx = first_tx_after(&*store, cutoff, block_no)?;
    let deleted = store.delete_consumed_tx_outs(before_tx)?;
    info!(block_no, cutoff, deleted, "pruned consumed outputs");
    Ok(deleted)
}

/// Id of the first transaction in a block above `cutoff`, or the next tx id
/// when no such transaction exists.
fn first_tx_after<S: DbStore + ?Sized>(store: &S, cutoff: u64, up_to: u64) -> Result<DbId, SyncError> {
    for no in cutoff + 1..=up_to {
        let Some(block_id) = store.find::<BlockRow>(&keys::block_no(no))? else {
            continue;
        };
        if let Some(tx_id) = store.lookup(Table::Tx, &keys::tx_slot(block_id, 0))? {
            return Ok(tx_id);
        }
    }
    Ok(store.next_ids().get(Table::Tx).unwrap_or(1))
}

/// Reverse index recorded for a block, if within the window at ingestion.
pub fn reverse_index<S: DbStore + ?Sized>(store: &S, block_id: DbId) -> Result<Option<MinIds>, SyncError> {
    match store.find::<ReverseIndexRow>(&keys::number(block_id))? {
        Some(id) => Ok(store.fetch::<ReverseIndexRow>(id)?.map(|r| r.min_ids)),
        None => Ok(None),
    }
}
