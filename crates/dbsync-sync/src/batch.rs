//! Per-block accumulator of deferred rows.
//!
//! Outputs, inputs, mints, and metadata of every transaction in a block are
//! collected here and bulk-inserted once at block end. Outputs created and
//! spent inside the same block are resolved from the batch, and repeated
//! multi-asset rows are coalesced before insertion.

use std::collections::HashMap;

use dbsync_core::error::StoreError;
use dbsync_core::schema::{DbId, DbInt65, DbRow, MaTxMintRow, MaTxOutRow, TxInRow, TxMetadataRow, TxOutRow};
use dbsync_core::store::{DbStore, DbStoreExt};

/// Where a spent output lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputRef {
    /// Already in the store under this id.
    Stored(DbId),
    /// Still pending in the batch at this position.
    Pending(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTxOut {
    pub row: TxOutRow,
    /// `(multi_asset id, quantity)`, one entry per asset.
    pub assets: Vec<(DbId, u64)>,
}

/// Row counts of a flushed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub tx_outs: usize,
    pub ma_tx_outs: usize,
    pub tx_ins: usize,
    pub consumed: usize,
    pub mints: usize,
    pub metadata: usize,
}

#[derive(Debug, Default)]
pub struct GroupedBatch {
    outs: Vec<PendingTxOut>,
    out_index: HashMap<(DbId, u64), usize>,
    ins: Vec<TxInRow>,
    consumed: Vec<(DbId, DbId)>,
    mints: Vec<MaTxMintRow>,
    mint_index: HashMap<(DbId, DbId), usize>,
    metadata: Vec<TxMetadataRow>,
}

impl GroupedBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.outs.is_empty()
            && self.ins.is_empty()
            && self.consumed.is_empty()
            && self.mints.is_empty()
            && self.metadata.is_empty()
    }

    /// Queue an output. Assets of the same id are summed.
    pub fn push_out(&mut self, row: TxOutRow, assets: Vec<(DbId, u64)>) -> usize {
        let mut merged: Vec<(DbId, u64)> = Vec::with_capacity(assets.len());
        for (ident, quantity) in assets {
            match merged.iter_mut().find(|(id, _)| *id == ident) {
                Some((_, q)) => *q = q.saturating_add(quantity),
                None => merged.push((ident, quantity)),
            }
        }
        let pos = self.outs.len();
        self.out_index.insert((row.tx_id, row.index), pos);
        self.outs.push(PendingTxOut { row, assets: merged });
        pos
    }

    /// A pending output of this block, by producing tx id and index.
    pub fn pending_out(&self, tx_id: DbId, index: u64) -> Option<(usize, &TxOutRow)> {
        let pos = *self.out_index.get(&(tx_id, index))?;
        Some((pos, &self.outs[pos].row))
    }

    /// Record that `consumer` spent the output.
    pub fn mark_consumed(&mut self, output: OutputRef, consumer: DbId) {
        match output {
            OutputRef::Pending(pos) => {
                if let Some(out) = self.outs.get_mut(pos) {
                    out.row.consumed_by_tx_id = Some(consumer);
                }
            }
            OutputRef::Stored(id) => self.consumed.push((id, consumer)),
        }
    }

    pub fn push_in(&mut self, row: TxInRow) {
        self.ins.push(row);
    }

    /// Queue a mint. Mints of the same asset in the same transaction are
    /// summed into one row.
    pub fn push_mint(&mut self, row: MaTxMintRow) {
        match self.mint_index.get(&(row.tx_id, row.ident)) {
            Some(&pos) => {
                let existing = &mut self.mints[pos];
                existing.quantity = DbInt65::from_i128(existing.quantity.to_i128() + row.quantity.to_i128());
            }
            None => {
                self.mint_index.insert((row.tx_id, row.ident), self.mints.len());
                self.mints.push(row);
            }
        }
    }

    pub fn push_metadata(&mut self, row: TxMetadataRow) {
        self.metadata.push(row);
    }

    /// Bulk-insert everything, one class at a time.
    pub fn flush<S: DbStore + ?Sized>(self, store: &mut S) -> Result<BatchStats, StoreError> {
        let mut stats = BatchStats::default();

        let (rows, assets): (Vec<DbRow>, Vec<Vec<(DbId, u64)>>) =
            self.outs.into_iter().map(|o| (DbRow::from(o.row), o.assets)).unzip();
        let out_ids = store.insert_many(rows)?;
        stats.tx_outs = out_ids.len();

        let ma_rows: Vec<DbRow> = out_ids
            .iter()
            .zip(assets)
            .flat_map(|(out_id, assets)| {
                assets
                    .into_iter()
                    .map(move |(ident, quantity)| DbRow::from(MaTxOutRow { ident, quantity, tx_out_id: *out_id }))
            })
            .collect();
        stats.ma_tx_outs = store.insert_many(ma_rows)?.len();

        stats.tx_ins = store.insert_many(self.ins.into_iter().map(DbRow::from).collect())?.len();

        for (out_id, consumer) in self.consumed {
            store.modify::<TxOutRow>(out_id, |o| o.consumed_by_tx_id = Some(consumer))?;
            stats.consumed += 1;
        }

        stats.mints = store.insert_many(self.mints.into_iter().map(DbRow::from).collect())?.len();
        stats.metadata = store.insert_many(self.metadata.into_iter().map(DbRow::from).collect())?.len();
        Ok(stats)
    }
}
