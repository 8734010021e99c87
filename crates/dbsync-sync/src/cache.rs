//! Bounded key → id memoization for frequently referenced entities.
//!
//! The store stays the source of truth: a miss falls back to a unique-key
//! lookup (and an insert when absent), so eviction or a zero capacity only
//! costs round trips, never correctness.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use dbsync_core::constants::{
    DEFAULT_ADDRESS_CACHE, DEFAULT_BLOCK_CACHE, DEFAULT_DATUM_CACHE, DEFAULT_MULTI_ASSET_CACHE,
    DEFAULT_POOL_CACHE, DEFAULT_STAKE_CACHE,
};
use dbsync_core::error::StoreError;
use dbsync_core::schema::{DbId, DbRow, Table};
use dbsync_core::store::DbStore;

/// Entity classes with their own cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheClass {
    StakeAddress,
    Pool,
    Block,
    Datum,
    MultiAsset,
    Address,
}

impl CacheClass {
    pub const ALL: [CacheClass; 6] = [
        CacheClass::StakeAddress,
        CacheClass::Pool,
        CacheClass::Block,
        CacheClass::Datum,
        CacheClass::MultiAsset,
        CacheClass::Address,
    ];

    /// Table whose unique key this class memoizes.
    pub fn table(&self) -> Table {
        match self {
            CacheClass::StakeAddress => Table::StakeAddress,
            CacheClass::Pool => Table::PoolHash,
            CacheClass::Block => Table::Block,
            CacheClass::Datum => Table::Datum,
            CacheClass::MultiAsset => Table::MultiAsset,
            CacheClass::Address => Table::Address,
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// What to do with the cache after resolving a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Remember the id.
    Cache,
    /// Resolve without remembering; for keys unlikely to be seen again.
    DoNotCache,
    /// Return the id and forget it; for keys whose lifetime ends here.
    Evict,
}

/// Per-class capacities. Zero disables a class.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSizes {
    pub stake_address: usize,
    pub pool: usize,
    pub block: usize,
    pub datum: usize,
    pub multi_asset: usize,
    pub address: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            stake_address: DEFAULT_STAKE_CACHE,
            pool: DEFAULT_POOL_CACHE,
            block: DEFAULT_BLOCK_CACHE,
            datum: DEFAULT_DATUM_CACHE,
            multi_asset: DEFAULT_MULTI_ASSET_CACHE,
            address: DEFAULT_ADDRESS_CACHE,
        }
    }
}

impl CacheSizes {
    /// Every class off. Output must match a cached run exactly.
    pub fn disabled() -> Self {
        Self { stake_address: 0, pool: 0, block: 0, datum: 0, multi_asset: 0, address: 0 }
    }

    fn get(&self, class: CacheClass) -> usize {
        match class {
            CacheClass::StakeAddress => self.stake_address,
            CacheClass::Pool => self.pool,
            CacheClass::Block => self.block,
            CacheClass::Datum => self.datum,
            CacheClass::MultiAsset => self.multi_asset,
            CacheClass::Address => self.address,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

struct ClassCache {
    map: Option<Mutex<LruCache<Vec<u8>, DbId>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ClassCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// The entity cache, one LRU per [`CacheClass`].
pub struct EntityCache {
    classes: Vec<ClassCache>,
}

impl EntityCache {
    pub fn new(sizes: CacheSizes) -> Self {
        Self { classes: CacheClass::ALL.iter().map(|c| ClassCache::new(sizes.get(*c))).collect() }
    }

    pub fn disabled() -> Self {
        Self::new(CacheSizes::disabled())
    }

    fn class(&self, class: CacheClass) -> &ClassCache {
        &self.classes[class.slot()]
    }

    /// Cached id, counting the hit or miss.
    pub fn get(&self, class: CacheClass, key: &[u8]) -> Option<DbId> {
        let c = self.class(class);
        let found = c.map.as_ref().and_then(|m| m.lock().get(key).copied());
        match found {
            Some(_) => c.hits.fetch_add(1, Ordering::Relaxed),
            None => c.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, class: CacheClass, key: Vec<u8>, id: DbId) {
        if let Some(m) = &self.class(class).map {
            m.lock().put(key, id);
        }
    }

    pub fn evict(&self, class: CacheClass, key: &[u8]) {
        if let Some(m) = &self.class(class).map {
            m.lock().pop(key);
        }
    }

    fn settle(&self, class: CacheClass, key: &[u8], id: DbId, action: CacheAction) {
        match action {
            CacheAction::Cache => self.put(class, key.to_vec(), id),
            CacheAction::DoNotCache => {}
            CacheAction::Evict => self.evict(class, key),
        }
    }

    /// Resolve an existing entity by its unique key.
    pub fn resolve<S: DbStore + ?Sized>(
        &self,
        store: &S,
        class: CacheClass,
        key: &[u8],
        action: CacheAction,
    ) -> Result<Option<DbId>, StoreError> {
        let id = match self.get(class, key) {
            Some(id) => Some(id),
            None => store.lookup(class.table(), key)?,
        };
        if let Some(id) = id {
            self.settle(class, key, id, action);
        }
        Ok(id)
    }

    /// Resolve the row's entity, inserting it when absent.
    ///
    /// The row's first unique key is the cache key. No duplicate row is
    /// created: on a miss the store is asked before inserting.
    pub fn resolve_or_insert<S: DbStore + ?Sized>(
        &self,
        store: &mut S,
        class: CacheClass,
        row: DbRow,
        action: CacheAction,
    ) -> Result<DbId, StoreError> {
        let key = row
            .unique_keys()
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::WrongTable(row.table().name().to_string()))?;
        let id = match self.get(class, &key) {
            Some(id) => id,
            None => store.insert_checked(row)?,
        };
        self.settle(class, &key, id, action);
        Ok(id)
    }

    pub fn stats(&self, class: CacheClass) -> CacheStats {
        let c = self.class(class);
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            len: c.map.as_ref().map_or(0, |m| m.lock().len()),
        }
    }

    /// Drop every cached id. Statistics are kept.
    pub fn clear(&self) {
        for c in &self.classes {
            if let Some(m) = &c.map {
                m.lock().clear();
            }
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(CacheSizes::default())
    }
}
