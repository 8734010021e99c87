//! Epoch-boundary insertions and the per-epoch aggregate row.

use tracing::{debug, info, warn};

use dbsync_core::error::SyncError;
use dbsync_core::ledger::{NewEpoch, StakeSlice};
use dbsync_core::schema::{
    keys, AdaPotsRow, BlockRow, DbId, DrepDistrRow, EpochParamRow, EpochRow, EpochStakeRow, RewardRow, Table, TxRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};

use crate::block::BlockCtx;
use crate::cache::CacheAction;
use crate::entities;
use crate::governance::apply_enact_state;
use crate::state::{BlockDiff, SyncEnv};

/// Persist everything the ledger handed over at an epoch boundary.
pub fn insert_new_epoch<S: DbStore + ?Sized>(
    ctx: &mut BlockCtx<'_>,
    store: &mut S,
    new_epoch: &NewEpoch,
) -> Result<(), SyncError> {
    let env = ctx.env;
    let epoch_no = new_epoch.epoch_no;
    info!(epoch = epoch_no, "epoch boundary");

    if let Some(params) = &new_epoch.params {
        store.insert_row_checked(EpochParamRow {
            epoch_no,
            params: params.clone(),
            nonce: new_epoch.nonce,
            block_id: ctx.block_id,
        })?;
        env.state.set_params(params.clone());
    }

    if let Some(pots) = &new_epoch.ada_pots {
        store.insert_row(AdaPotsRow {
            slot_no: pots.slot_no,
            epoch_no,
            treasury: pots.treasury,
            reserves: pots.reserves,
            rewards: pots.rewards,
            utxo: pots.utxo,
            deposits_stake: pots.deposits_stake,
            deposits_drep: pots.deposits_drep,
            deposits_proposal: pots.deposits_proposal,
            fees: pots.fees,
            block_id: ctx.block_id,
        })?;
    }

    if env.options.governance {
        if let Some(distr) = &new_epoch.drep_distr {
            for stake in distr {
                let hash_id = entities::drep_hash_id(store, &stake.drep)?;
                store.insert_row(DrepDistrRow {
                    hash_id,
                    amount: stake.amount,
                    epoch_no,
                    active_until: stake.active_until,
                })?;
            }
        }
        if let Some(enact) = &new_epoch.enact {
            apply_enact_state(store, epoch_no, enact)?;
        }
    }

    if env.options.rewards && env.options.use_ledger_data {
        for reward in &new_epoch.rewards {
            let addr_id = entities::stake_address_id(&env.cache, store, &reward.address, CacheAction::Cache)?;
            let pool_id = match &reward.pool {
                Some(pool) => Some(entities::pool_id(&env.cache, store, pool)?),
                None => None,
            };
            store.insert_row(RewardRow {
                addr_id,
                kind: reward.kind,
                amount: reward.amount,
                earned_epoch: reward.earned_epoch,
                spendable_epoch: reward.spendable_epoch,
                pool_id,
            })?;
        }
    }

    if let Some(prev) = epoch_no.checked_sub(1) {
        insert_epoch_row(env, store, prev, ctx.block.block_no)?;
    }
    Ok(())
}

/// Store a slice of the stake distribution.
pub fn insert_stake_slice<S: DbStore + ?Sized>(
    ctx: &BlockCtx<'_>,
    store: &mut S,
    slice: &StakeSlice,
) -> Result<usize, SyncError> {
    let cache = &ctx.env.cache;
    for entry in &slice.entries {
        let addr_id = entities::stake_address_id(cache, store, &entry.address, CacheAction::Cache)?;
        let pool_id = entities::pool_id(cache, store, &entry.pool)?;
        store.insert_row(EpochStakeRow { addr_id, pool_id, amount: entry.amount, epoch_no: slice.epoch_no })?;
    }
    debug!(epoch = slice.epoch_no, entries = slice.entries.len(), "stake slice stored");
    Ok(slice.entries.len())
}

/// Write the aggregate row of a finished epoch.
///
/// Recorded block diffs are used when they cover the whole epoch. Otherwise
/// the epoch's stored blocks are read by walking back by block number from
/// `from_block_no` (the block that closed the epoch, or the db tip).
pub fn insert_epoch_row<S: DbStore + ?Sized>(
    env: &SyncEnv,
    store: &mut S,
    epoch_no: u64,
    from_block_no: Option<u64>,
) -> Result<DbId, SyncError> {
    let diffs = env.take_block_diffs(epoch_no);
    let from = from_block_no.or_else(|| env.state.db_tip().and_then(|t| t.block_no));
    let row = match from {
        _ if diffs.iter().any(|d| d.opens_epoch) => fold_diffs(epoch_no, &diffs),
        Some(from) => scan_epoch(store, epoch_no, from)?,
        None => {
            warn!(epoch = epoch_no, "no block number to scan from, epoch row built from partial diffs");
            fold_diffs(epoch_no, &diffs)
        }
    };
    debug!(epoch = epoch_no, blocks = row.blk_count, txs = row.tx_count, "epoch row");
    Ok(store.insert_row_checked(row)?)
}

fn fold_diffs(epoch_no: u64, diffs: &[BlockDiff]) -> EpochRow {
    let mut row = EpochRow {
        no: epoch_no,
        out_sum: 0,
        fees: 0,
        tx_count: 0,
        blk_count: 0,
        start_time: i64::MAX,
        end_time: i64::MIN,
    };
    for d in diffs {
        row.out_sum += d.out_sum;
        row.fees += d.fees;
        row.tx_count += d.tx_count;
        row.blk_count += 1;
        row.start_time = row.start_time.min(d.time);
        row.end_time = row.end_time.max(d.time);
    }
    if row.blk_count == 0 {
        row.start_time = 0;
        row.end_time = 0;
    }
    row
}

/// Blocks at or below `from` with a later epoch are skipped; the walk stops
/// at the first block of an earlier epoch or a gap in block numbers.
fn scan_epoch<S: DbStore + ?Sized>(store: &S, epoch_no: u64, from: u64) -> Result<EpochRow, SyncError> {
    let mut blocks = Vec::new();
    for no in (0..=from).rev() {
        let Some(id) = store.find::<BlockRow>(&keys::block_no(no))? else {
            break;
        };
        let Some(block) = store.fetch::<BlockRow>(id)? else {
            break;
        };
        match block.epoch_no {
            Some(e) if e == epoch_no => blocks.push((id, block)),
            Some(e) if e < epoch_no => break,
            _ => {}
        }
    }

    let diffs: Vec<BlockDiff> = blocks
        .iter()
        .map(|(_, b)| BlockDiff { epoch_no, fees: 0, out_sum: 0, tx_count: 0, time: b.time, opens_epoch: false })
        .collect();
    let mut row = fold_diffs(epoch_no, &diffs);
    for (block_id, block) in &blocks {
        for index in 0..block.tx_count {
            let Some(tx_id) = store.lookup(Table::Tx, &keys::tx_slot(*block_id, index))? else {
                continue;
            };
            if let Some(tx) = store.fetch::<TxRow>(tx_id)? {
                row.tx_count += 1;
                row.fees += tx.fee as u128;
                row.out_sum += tx.out_sum;
            }
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_core::store::MemoryStore;
    use dbsync_core::types::{Era, Hash32};

    use crate::state::SyncSettings;

    fn diff(time: i64, fees: u128, opens_epoch: bool) -> BlockDiff {
        BlockDiff { epoch_no: 4, fees, out_sum: 10, tx_count: 2, time, opens_epoch }
    }

    fn block(seed: u8, epoch_no: u64, time: i64) -> BlockRow {
        BlockRow {
            hash: Hash32([seed; 32]),
            epoch_no: Some(epoch_no),
            slot_no: Some(seed as u64),
            epoch_slot_no: None,
            block_no: Some(seed as u64),
            previous_id: None,
            slot_leader_id: 1,
            size: 0,
            time,
            tx_count: 0,
            proto_major: 2,
            proto_minor: 0,
            vrf_key: None,
            op_cert: None,
            op_cert_counter: None,
            era: Era::Shelley,
        }
    }

    #[test]
    fn complete_diffs_are_folded() {
        let env = SyncEnv::new(SyncSettings::default());
        env.record_block_diff(diff(100, 3, true));
        env.record_block_diff(diff(120, 4, false));
        let mut store = MemoryStore::new();
        let id = insert_epoch_row(&env, &mut store, 4, None).unwrap();
        let row: EpochRow = store.fetch(id).unwrap().unwrap();
        assert_eq!((row.blk_count, row.tx_count, row.fees, row.out_sum), (2, 4, 7, 20));
        assert_eq!((row.start_time, row.end_time), (100, 120));
    }

    #[test]
    fn partial_diffs_fall_back_to_scan() {
        let env = SyncEnv::new(SyncSettings::default());
        env.record_block_diff(diff(120, 4, false));
        let mut store = MemoryStore::new();
        store.insert_row(block(1, 4, 90)).unwrap();
        store.insert_row(block(2, 4, 120)).unwrap();
        store.insert_row(block(3, 5, 200)).unwrap();
        let id = insert_epoch_row(&env, &mut store, 4, Some(3)).unwrap();
        let row: EpochRow = store.fetch(id).unwrap().unwrap();
        assert_eq!(row.blk_count, 2);
        assert_eq!(row.start_time, 90);
    }

    #[test]
    fn scan_stops_at_the_previous_epoch() {
        let env = SyncEnv::new(SyncSettings::default());
        let mut store = MemoryStore::new();
        store.insert_row(block(1, 3, 10)).unwrap();
        store.insert_row(block(2, 4, 30)).unwrap();
        store.insert_row(block(3, 4, 50)).unwrap();
        store.insert_row(block(4, 5, 70)).unwrap();
        let id = insert_epoch_row(&env, &mut store, 4, Some(4)).unwrap();
        let row: EpochRow = store.fetch(id).unwrap().unwrap();
        assert_eq!((row.blk_count, row.start_time, row.end_time), (2, 30, 50));
    }
}
