//! Storage contract and the in-memory implementation.
//!
//! [`DbStore`] is what the ingestion pipeline writes through. It offers
//! per-table id sequences, unique-key lookups, an all-or-nothing block
//! transaction, and the deletion primitives used by rollback and pruning.
//! [`MemoryStore`] backs the tests; the node uses a RocksDB store.

use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::schema::{DbId, DbRow, MinIds, Table, TableRow};

/// One-time migrations delegated to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationKind {
    CreateIndexes,
    DataFixes,
}

impl MigrationKind {
    /// Durable marker key recorded once the migration ran.
    pub fn marker(&self) -> &'static str {
        match self {
            MigrationKind::CreateIndexes => "migration.indexes",
            MigrationKind::DataFixes => "migration.fixes",
        }
    }
}

/// Relational storage backend.
///
/// Writes made between [`begin`](DbStore::begin) and
/// [`commit`](DbStore::commit) become visible to reads immediately but are
/// only made durable on commit; [`abort`](DbStore::abort) discards them.
/// Writes outside a transaction commit on their own.
pub trait DbStore: Send {
    /// Open a block transaction.
    ///
    /// # Errors
    ///
    /// - [`StoreError::TxnAlreadyOpen`] if one is already open
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Make every write since `begin` durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every write since `begin`. No-op without an open transaction.
    fn abort(&mut self);

    fn in_txn(&self) -> bool;

    /// Insert a row and return its new id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UniqueViolation`] if any unique key of the row exists
    fn insert(&mut self, row: DbRow) -> Result<DbId, StoreError>;

    /// Insert rows of possibly different tables, returning ids in order.
    fn insert_many(&mut self, rows: Vec<DbRow>) -> Result<Vec<DbId>, StoreError> {
        rows.into_iter().map(|row| self.insert(row)).collect()
    }

    /// Id of the row holding `key` as a unique key.
    fn lookup(&self, table: Table, key: &[u8]) -> Result<Option<DbId>, StoreError>;

    fn get(&self, table: Table, id: DbId) -> Result<Option<DbRow>, StoreError>;

    /// Overwrite an existing row. Unique keys must not change.
    ///
    /// # Errors
    ///
    /// - [`StoreError::MissingRow`] if no row has that id
    fn replace(&mut self, id: DbId, row: DbRow) -> Result<(), StoreError>;

    /// Next id each table would hand out.
    fn next_ids(&self) -> MinIds;

    /// Delete every row whose id is at least the table's entry in `min`, and
    /// clear `consumed_by_tx_id` on outputs consumed by a deleted
    /// transaction. Returns the number of rows deleted.
    fn delete_from(&mut self, min: &MinIds) -> Result<u64, StoreError>;

    /// Delete outputs consumed by a transaction with id below `before_tx`.
    fn delete_consumed_tx_outs(&mut self, before_tx: DbId) -> Result<u64, StoreError>;

    fn count(&self, table: Table) -> Result<u64, StoreError>;

    /// Rows of a table with id at or above `from`, in id order.
    fn scan(&self, table: Table, from: DbId) -> Result<Vec<(DbId, DbRow)>, StoreError>;

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set_meta(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Run a one-time migration and record its marker.
    fn run_migration(&mut self, kind: MigrationKind) -> Result<(), StoreError> {
        self.set_meta(kind.marker(), b"1")
    }

    /// Insert unless a row with the same lookup key exists; either way
    /// return the row's id.
    fn insert_checked(&mut self, row: DbRow) -> Result<DbId, StoreError> {
        let table = row.table();
        if let Some(key) = row.unique_keys().first() {
            if let Some(id) = self.lookup(table, key)? {
                return Ok(id);
            }
        }
        self.insert(row)
    }

    /// Highest-id block row.
    fn latest_block(&self) -> Result<Option<(DbId, DbRow)>, StoreError> {
        let next = self.next_ids().get(Table::Block).unwrap_or(1);
        let mut id = next;
        while id > 1 {
            id -= 1;
            if let Some(row) = self.get(Table::Block, id)? {
                return Ok(Some((id, row)));
            }
        }
        Ok(None)
    }
}

/// Typed helpers over [`DbStore`].
pub trait DbStoreExt: DbStore {
    fn insert_row<R: TableRow>(&mut self, row: R) -> Result<DbId, StoreError> {
        self.insert(row.into())
    }

    fn insert_row_checked<R: TableRow>(&mut self, row: R) -> Result<DbId, StoreError> {
        self.insert_checked(row.into())
    }

    fn fetch<R: TableRow>(&self, id: DbId) -> Result<Option<R>, StoreError> {
        self.get(R::TABLE, id)?.map(R::try_from).transpose()
    }

    fn find<R: TableRow>(&self, key: &[u8]) -> Result<Option<DbId>, StoreError> {
        self.lookup(R::TABLE, key)
    }

    /// Read a row, apply `f`, and write it back.
    fn modify<R: TableRow>(&mut self, id: DbId, f: impl FnOnce(&mut R)) -> Result<(), StoreError> {
        let mut row: R = self.fetch(id)?.ok_or_else(|| StoreError::MissingRow {
            table: R::TABLE.name().to_string(),
            id,
        })?;
        f(&mut row);
        self.replace(id, row.into())
    }

    fn rows<R: TableRow>(&self) -> Result<Vec<(DbId, R)>, StoreError> {
        self.scan(R::TABLE, 1)?
            .into_iter()
            .map(|(id, row)| Ok((id, R::try_from(row)?)))
            .collect()
    }
}

impl<S: DbStore + ?Sized> DbStoreExt for S {}

#[derive(Clone, Debug, Default)]
struct MemoryInner {
    tables: BTreeMap<Table, BTreeMap<DbId, DbRow>>,
    index: HashMap<(Table, Vec<u8>), DbId>,
    next: BTreeMap<Table, DbId>,
    meta: HashMap<String, Vec<u8>>,
}

impl MemoryInner {
    fn remove(&mut self, table: Table, id: DbId) -> Option<DbRow> {
        let row = self.tables.get_mut(&table)?.remove(&id)?;
        for key in row.unique_keys() {
            self.index.remove(&(table, key));
        }
        Some(row)
    }
}

/// In-memory store. `begin` snapshots the whole state; `abort` restores it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: MemoryInner,
    snapshot: Option<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DbStore for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::TxnAlreadyOpen);
        }
        self.snapshot = Some(self.inner.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot.take().map(|_| ()).ok_or(StoreError::NoOpenTxn)
    }

    fn abort(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.inner = snapshot;
        }
    }

    fn in_txn(&self) -> bool {
        self.snapshot.is_some()
    }

    fn insert(&mut self, row: DbRow) -> Result<DbId, StoreError> {
        let table = row.table();
        let keys = row.unique_keys();
        if keys.iter().any(|k| self.inner.index.contains_key(&(table, k.clone()))) {
            return Err(StoreError::UniqueViolation { table: table.name().to_string() });
        }
        let next = self.inner.next.entry(table).or_insert(1);
        let id = *next;
        *next += 1;
        for key in keys {
            self.inner.index.insert((table, key), id);
        }
        self.inner.tables.entry(table).or_default().insert(id, row);
        Ok(id)
    }

    fn lookup(&self, table: Table, key: &[u8]) -> Result<Option<DbId>, StoreError> {
        Ok(self.inner.index.get(&(table, key.to_vec())).copied())
    }

    fn get(&self, table: Table, id: DbId) -> Result<Option<DbRow>, StoreError> {
        Ok(self.inner.tables.get(&table).and_then(|t| t.get(&id)).cloned())
    }

    fn replace(&mut self, id: DbId, row: DbRow) -> Result<(), StoreError> {
        let table = row.table();
        let slot = self
            .inner
            .tables
            .get_mut(&table)
            .and_then(|t| t.get_mut(&id))
            .ok_or_else(|| StoreError::MissingRow { table: table.name().to_string(), id })?;
        *slot = row;
        Ok(())
    }

    fn next_ids(&self) -> MinIds {
        MinIds(
            Table::ALL
                .iter()
                .map(|t| (*t, self.inner.next.get(t).copied().unwrap_or(1)))
                .collect(),
        )
    }

    fn delete_from(&mut self, min: &MinIds) -> Result<u64, StoreError> {
        let mut deleted = 0;
        for (table, from) in &min.0 {
            let ids: Vec<DbId> = self
                .inner
                .tables
                .get(table)
                .map(|t| t.range(*from..).map(|(id, _)| *id).collect())
                .unwrap_or_default();
            for id in ids {
                if self.inner.remove(*table, id).is_some() {
                    deleted += 1;
                }
            }
            let next = self.inner.next.entry(*table).or_insert(1);
            *next = (*next).min(*from);
        }
        if let Some(first_tx) = min.get(Table::Tx) {
            if let Some(outs) = self.inner.tables.get_mut(&Table::TxOut) {
                for row in outs.values_mut() {
                    if let DbRow::TxOut(out) = row {
                        if out.consumed_by_tx_id.is_some_and(|tx| tx >= first_tx) {
                            out.consumed_by_tx_id = None;
                        }
                    }
                }
            }
        }
        Ok(deleted)
    }

    fn delete_consumed_tx_outs(&mut self, before_tx: DbId) -> Result<u64, StoreError> {
        let ids: Vec<DbId> = self
            .inner
            .tables
            .get(&Table::TxOut)
            .map(|t| {
                t.iter()
                    .filter(|(_, row)| row.consumed_by().is_some_and(|tx| tx < before_tx))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default();
        let count = ids.len() as u64;
        for id in ids {
            self.inner.remove(Table::TxOut, id);
        }
        Ok(count)
    }

    fn count(&self, table: Table) -> Result<u64, StoreError> {
        Ok(self.inner.tables.get(&table).map_or(0, |t| t.len() as u64))
    }

    fn scan(&self, table: Table, from: DbId) -> Result<Vec<(DbId, DbRow)>, StoreError> {
        Ok(self
            .inner
            .tables
            .get(&table)
            .map(|t| t.range(from..).map(|(id, row)| (*id, row.clone())).collect())
            .unwrap_or_default())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.meta.get(key).cloned())
    }

    fn set_meta(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner.meta.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
