//! RocksDB-backed relational store.
//!
//! Implements [`DbStore`] with one column family per table (rows keyed by
//! big-endian id) plus column families for the unique-key index, the
//! consumed-output index, id sequences and row counts, and metadata.
//!
//! Writes made inside a block transaction are staged in memory and read
//! through; [`commit`](DbStore::commit) writes them in a single atomic
//! [`WriteBatch`], [`abort`](DbStore::abort) drops them.

use std::collections::BTreeMap;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use dbsync_core::error::StoreError;
use dbsync_core::schema::{DbId, DbRow, MinIds, Table};
use dbsync_core::store::DbStore;

// --- Column family names ---

const CF_INDEX: &str = "index";
const CF_CONSUMED: &str = "consumed";
const CF_SEQUENCES: &str = "sequences";
const CF_METADATA: &str = "metadata";

/// A column family of the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Cf {
    Rows(Table),
    /// `table name ':' unique key` to row id.
    Index,
    /// `consumer tx id ++ output id`, empty value.
    Consumed,
    Metadata,
}

impl Cf {
    fn name(&self) -> String {
        match self {
            Cf::Rows(table) => format!("rows.{}", table.name()),
            Cf::Index => CF_INDEX.to_string(),
            Cf::Consumed => CF_CONSUMED.to_string(),
            Cf::Metadata => CF_METADATA.to_string(),
        }
    }
}

/// Writes of the open block transaction. `None` marks a deletion.
#[derive(Default)]
struct Staging {
    writes: BTreeMap<(Cf, Vec<u8>), Option<Vec<u8>>>,
    next: BTreeMap<Table, DbId>,
    counts: BTreeMap<Table, u64>,
}

pub struct RocksStore {
    db: DB,
    /// Committed id sequences.
    next: BTreeMap<Table, DbId>,
    /// Committed row counts.
    counts: BTreeMap<Table, u64>,
    staging: Option<Staging>,
}

impl RocksStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let mut names: Vec<String> = Table::ALL.iter().map(|t| Cf::Rows(*t).name()).collect();
        names.extend([CF_INDEX, CF_CONSUMED, CF_SEQUENCES, CF_METADATA].map(String::from));
        let descriptors: Vec<ColumnFamilyDescriptor> =
            names.iter().map(|name| ColumnFamilyDescriptor::new(name, Options::default())).collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), descriptors).map_err(backend)?;
        let mut store = Self { db, next: BTreeMap::new(), counts: BTreeMap::new(), staging: None };
        store.load_sequences()?;
        store.load_counts()?;
        tracing::info!(path = %path.as_ref().display(), "opened store");
        Ok(store)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(backend)
    }

    /// Trigger manual compaction of every row column family.
    pub fn compact(&self) -> Result<(), StoreError> {
        for table in Table::ALL {
            let cf = self.cf_handle(&Cf::Rows(*table).name())?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    // --- Internal helpers ---

    fn load_sequences(&mut self) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_SEQUENCES)?;
        let mut next = BTreeMap::new();
        for table in Table::ALL {
            if let Some(bytes) = self.db.get_cf(cf, table.name()).map_err(backend)? {
                next.insert(*table, decode_id(&bytes)?);
            }
        }
        self.next = next;
        Ok(())
    }

    /// Row counts from the sequences column family. A table without a
    /// stored count is counted once and the count written back.
    fn load_counts(&mut self) -> Result<(), StoreError> {
        let mut counts = BTreeMap::new();
        let mut missing = Vec::new();
        {
            let cf = self.cf_handle(CF_SEQUENCES)?;
            for table in Table::ALL {
                match self.db.get_cf(cf, count_key(*table)).map_err(backend)? {
                    Some(bytes) => {
                        counts.insert(*table, decode_id(&bytes)?);
                    }
                    None => missing.push(*table),
                }
            }
        }
        for table in missing {
            let n = self.range(Cf::Rows(table), &[], None)?.len() as u64;
            if n > 0 {
                tracing::info!(table = %table, rows = n, "recounted table");
            }
            self.db.put_cf(self.cf_handle(CF_SEQUENCES)?, count_key(table), n.to_be_bytes()).map_err(backend)?;
            counts.insert(table, n);
        }
        self.counts = counts;
        Ok(())
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn staging_mut(&mut self) -> Result<&mut Staging, StoreError> {
        self.staging.as_mut().ok_or(StoreError::NoOpenTxn)
    }

    /// Run a write in the open transaction, or in one of its own.
    fn autocommit<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, StoreError>) -> Result<T, StoreError> {
        if self.staging.is_some() {
            return f(self);
        }
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn read(&self, cf: Cf, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staging.as_ref().and_then(|s| s.writes.get(&(cf, key.to_vec()))) {
            return Ok(staged.clone());
        }
        self.db.get_cf(self.cf_handle(&cf.name())?, key).map_err(backend)
    }

    fn put(&mut self, cf: Cf, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.staging_mut()?.writes.insert((cf, key), Some(value));
        Ok(())
    }

    fn delete(&mut self, cf: Cf, key: Vec<u8>) -> Result<(), StoreError> {
        self.staging_mut()?.writes.insert((cf, key), None);
        Ok(())
    }

    /// Entries of `cf` with keys in `[from, to)`, staged writes applied.
    fn range(&self, cf: Cf, from: &[u8], to: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = BTreeMap::new();
        let handle = self.cf_handle(&cf.name())?;
        for item in self.db.iterator_cf(handle, IteratorMode::From(from, Direction::Forward)) {
            let (key, value) = item.map_err(backend)?;
            if to.is_some_and(|t| key.as_ref() >= t) {
                break;
            }
            out.insert(key.to_vec(), value.to_vec());
        }
        if let Some(staging) = &self.staging {
            for ((c, key), value) in staging.writes.range((cf, from.to_vec())..) {
                if *c != cf || to.is_some_and(|t| key.as_slice() >= t) {
                    break;
                }
                match value {
                    Some(v) => {
                        out.insert(key.clone(), v.clone());
                    }
                    None => {
                        out.remove(key);
                    }
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    fn row_count(&self, table: Table) -> u64 {
        let staged = self.staging.as_ref().and_then(|s| s.counts.get(&table));
        staged.or_else(|| self.counts.get(&table)).copied().unwrap_or(0)
    }

    fn set_row_count(&mut self, table: Table, n: u64) -> Result<(), StoreError> {
        self.staging_mut()?.counts.insert(table, n);
        Ok(())
    }

    fn next_id(&self, table: Table) -> DbId {
        let staged = self.staging.as_ref().and_then(|s| s.next.get(&table));
        staged.or_else(|| self.next.get(&table)).copied().unwrap_or(1)
    }

    fn write_row(&mut self, id: DbId, row: &DbRow) -> Result<(), StoreError> {
        let table = row.table();
        for key in row.unique_keys() {
            self.put(Cf::Index, index_key(table, &key), id.to_be_bytes().to_vec())?;
        }
        if let Some(consumer) = row.consumed_by() {
            self.put(Cf::Consumed, consumed_key(consumer, id), Vec::new())?;
        }
        self.put(Cf::Rows(table), id.to_be_bytes().to_vec(), encode_row(row)?)
    }

    fn remove_row(&mut self, table: Table, id: DbId) -> Result<Option<DbRow>, StoreError> {
        let Some(row) = self.get(table, id)? else {
            return Ok(None);
        };
        for key in row.unique_keys() {
            self.delete(Cf::Index, index_key(table, &key))?;
        }
        if let Some(consumer) = row.consumed_by() {
            self.delete(Cf::Consumed, consumed_key(consumer, id))?;
        }
        self.delete(Cf::Rows(table), id.to_be_bytes().to_vec())?;
        Ok(Some(row))
    }

    /// `(consumer, output)` pairs with consumer in `[from, to)`.
    fn consumed_between(&self, from: DbId, to: Option<DbId>) -> Result<Vec<(DbId, DbId)>, StoreError> {
        let to = to.map(|t| t.to_be_bytes());
        self.range(Cf::Consumed, &from.to_be_bytes(), to.as_ref().map(|t| t.as_slice()))?
            .into_iter()
            .map(|(key, _)| {
                let consumer = decode_id(&key[..8])?;
                let output = decode_id(key.get(8..16).unwrap_or_default())?;
                Ok((consumer, output))
            })
            .collect()
    }
}

impl DbStore for RocksStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.staging.is_some() {
            return Err(StoreError::TxnAlreadyOpen);
        }
        self.staging = Some(Staging { writes: BTreeMap::new(), next: self.next.clone(), counts: self.counts.clone() });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let staging = self.staging.take().ok_or(StoreError::NoOpenTxn)?;
        let mut batch = WriteBatch::default();
        for ((cf, key), value) in &staging.writes {
            let handle = self.cf_handle(&cf.name())?;
            match value {
                Some(v) => batch.put_cf(handle, key, v),
                None => batch.delete_cf(handle, key),
            }
        }
        let sequences = self.cf_handle(CF_SEQUENCES)?;
        for (table, next) in &staging.next {
            if self.next.get(table) != Some(next) {
                batch.put_cf(sequences, table.name(), next.to_be_bytes());
            }
        }
        for (table, n) in &staging.counts {
            if self.counts.get(table) != Some(n) {
                batch.put_cf(sequences, count_key(*table), n.to_be_bytes());
            }
        }
        self.db.write(batch).map_err(backend)?;
        self.next = staging.next;
        self.counts = staging.counts;
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(staging) = self.staging.take() {
            tracing::debug!(writes = staging.writes.len(), "aborted store transaction");
        }
    }

    fn in_txn(&self) -> bool {
        self.staging.is_some()
    }

    fn insert(&mut self, row: DbRow) -> Result<DbId, StoreError> {
        self.autocommit(|store| {
            let table = row.table();
            for key in row.unique_keys() {
                if store.read(Cf::Index, &index_key(table, &key))?.is_some() {
                    return Err(StoreError::UniqueViolation { table: table.name().to_string() });
                }
            }
            let id = store.next_id(table);
            store.staging_mut()?.next.insert(table, id + 1);
            store.write_row(id, &row)?;
            store.set_row_count(table, store.row_count(table) + 1)?;
            Ok(id)
        })
    }

    fn lookup(&self, table: Table, key: &[u8]) -> Result<Option<DbId>, StoreError> {
        self.read(Cf::Index, &index_key(table, key))?.map(|b| decode_id(&b)).transpose()
    }

    fn get(&self, table: Table, id: DbId) -> Result<Option<DbRow>, StoreError> {
        self.read(Cf::Rows(table), &id.to_be_bytes())?.map(|b| decode_row(&b)).transpose()
    }

    fn replace(&mut self, id: DbId, row: DbRow) -> Result<(), StoreError> {
        self.autocommit(|store| {
            let table = row.table();
            store
                .remove_row(table, id)?
                .ok_or_else(|| StoreError::MissingRow { table: table.name().to_string(), id })?;
            store.write_row(id, &row)
        })
    }

    fn next_ids(&self) -> MinIds {
        MinIds(Table::ALL.iter().map(|t| (*t, self.next_id(*t))).collect())
    }

    fn delete_from(&mut self, min: &MinIds) -> Result<u64, StoreError> {
        self.autocommit(|store| {
            let mut deleted = 0;
            for (table, from) in &min.0 {
                let mut removed = 0;
                for (key, _) in store.range(Cf::Rows(*table), &from.to_be_bytes(), None)? {
                    if store.remove_row(*table, decode_id(&key)?)?.is_some() {
                        removed += 1;
                    }
                }
                store.set_row_count(*table, store.row_count(*table).saturating_sub(removed))?;
                deleted += removed;
                let next = store.next_id(*table).min(*from);
                store.staging_mut()?.next.insert(*table, next);
            }
            if let Some(first_tx) = min.get(Table::Tx) {
                for (_, output) in store.consumed_between(first_tx, None)? {
                    if let Some(DbRow::TxOut(mut out)) = store.get(Table::TxOut, output)? {
                        out.consumed_by_tx_id = None;
                        store.replace(output, DbRow::TxOut(out))?;
                    }
                }
            }
            Ok(deleted)
        })
    }

    fn delete_consumed_tx_outs(&mut self, before_tx: DbId) -> Result<u64, StoreError> {
        self.autocommit(|store| {
            let mut deleted = 0;
            for (_, output) in store.consumed_between(0, Some(before_tx))? {
                if store.remove_row(Table::TxOut, output)?.is_some() {
                    deleted += 1;
                }
            }
            store.set_row_count(Table::TxOut, store.row_count(Table::TxOut).saturating_sub(deleted))?;
            Ok(deleted)
        })
    }

    fn count(&self, table: Table) -> Result<u64, StoreError> {
        Ok(self.row_count(table))
    }

    fn scan(&self, table: Table, from: DbId) -> Result<Vec<(DbId, DbRow)>, StoreError> {
        self.range(Cf::Rows(table), &from.to_be_bytes(), None)?
            .into_iter()
            .map(|(key, value)| Ok((decode_id(&key)?, decode_row(&value)?)))
            .collect()
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(Cf::Metadata, key.as_bytes())
    }

    fn set_meta(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.autocommit(|store| store.put(Cf::Metadata, key.as_bytes().to_vec(), value.to_vec()))
    }
}

fn backend(err: rocksdb::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn index_key(table: Table, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(table.name().len() + 1 + key.len());
    out.extend_from_slice(table.name().as_bytes());
    out.push(b':');
    out.extend_from_slice(key);
    out
}

fn count_key(table: Table) -> String {
    format!("count.{}", table.name())
}

fn consumed_key(consumer: DbId, output: DbId) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&consumer.to_be_bytes());
    out.extend_from_slice(&output.to_be_bytes());
    out
}

fn decode_id(bytes: &[u8]) -> Result<DbId, StoreError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Codec("invalid id length".into()))?;
    Ok(DbId::from_be_bytes(arr))
}

fn encode_row(row: &DbRow) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(row, bincode::config::standard()).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode_row(bytes: &[u8]) -> Result<DbRow, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(row, _)| row)
        .map_err(|e| StoreError::Codec(e.to_string()))
}
