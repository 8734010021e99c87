//! Resolvers for content-addressed entities shared by several insert
//! routines. Cached classes go through the entity cache; the rest use a
//! checked insert directly.

use dbsync_core::certs::DRep;
use dbsync_core::error::StoreError;
use dbsync_core::schema::{
    AddressRow, CommitteeHashRow, DatumRow, DbId, DrepHashRow, MultiAssetRow, PoolHashRow,
    RedeemerDataRow, ScriptRow, StakeAddressRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};
use dbsync_core::types::{Address, Credential, Datum, Hash28, Script, StakeAddress};
use dbsync_core::cbor;

use crate::cache::{CacheAction, CacheClass, EntityCache};

pub fn stake_address_id<S: DbStore + ?Sized>(
    cache: &EntityCache,
    store: &mut S,
    addr: &StakeAddress,
    action: CacheAction,
) -> Result<DbId, StoreError> {
    let row = StakeAddressRow { hash_raw: addr.to_bytes(), view: addr.view(), script_hash: addr.script_hash() };
    cache.resolve_or_insert(store, CacheClass::StakeAddress, row.into(), action)
}

pub fn pool_id<S: DbStore + ?Sized>(cache: &EntityCache, store: &mut S, pool: &Hash28) -> Result<DbId, StoreError> {
    let row = PoolHashRow { hash_raw: *pool, view: format!("pool:{pool}") };
    cache.resolve_or_insert(store, CacheClass::Pool, row.into(), CacheAction::Cache)
}

/// Insert the address, linking it to an already resolved stake address.
pub fn address_id<S: DbStore + ?Sized>(
    cache: &EntityCache,
    store: &mut S,
    addr: &Address,
    stake_address_id: Option<DbId>,
) -> Result<DbId, StoreError> {
    let row = AddressRow {
        raw: addr.raw.clone(),
        view: addr.view.clone(),
        has_script: addr.has_script(),
        payment_cred: addr.payment.map(|c| *c.hash()),
        stake_address_id,
    };
    cache.resolve_or_insert(store, CacheClass::Address, row.into(), CacheAction::Cache)
}

pub fn multi_asset_id<S: DbStore + ?Sized>(
    cache: &EntityCache,
    store: &mut S,
    policy: &Hash28,
    name: &[u8],
) -> Result<DbId, StoreError> {
    let row = MultiAssetRow { policy: *policy, name: name.to_vec() };
    cache.resolve_or_insert(store, CacheClass::MultiAsset, row.into(), CacheAction::Cache)
}

pub fn datum_id<S: DbStore + ?Sized>(
    cache: &EntityCache,
    store: &mut S,
    tx_id: DbId,
    datum: &Datum,
) -> Result<DbId, StoreError> {
    let row = DatumRow { hash: datum.hash, tx_id, value: cbor::to_json(&datum.bytes), bytes: datum.bytes.clone() };
    cache.resolve_or_insert(store, CacheClass::Datum, row.into(), CacheAction::Cache)
}

pub fn redeemer_data_id<S: DbStore + ?Sized>(store: &mut S, tx_id: DbId, datum: &Datum) -> Result<DbId, StoreError> {
    store.insert_row_checked(RedeemerDataRow {
        hash: datum.hash,
        tx_id,
        value: cbor::to_json(&datum.bytes),
        bytes: datum.bytes.clone(),
    })
}

pub fn script_id<S: DbStore + ?Sized>(store: &mut S, tx_id: DbId, script: &Script) -> Result<DbId, StoreError> {
    store.insert_row_checked(ScriptRow {
        tx_id,
        hash: script.hash,
        kind: script.kind,
        bytes: script.bytes.clone(),
        serialised_size: Some(script.bytes.len() as u64),
    })
}

pub fn drep_hash_id<S: DbStore + ?Sized>(store: &mut S, drep: &DRep) -> Result<DbId, StoreError> {
    store.insert_row_checked(DrepHashRow { raw: drep.raw(), view: drep.view(), has_script: drep.has_script() })
}

pub fn committee_hash_id<S: DbStore + ?Sized>(store: &mut S, cred: &Credential) -> Result<DbId, StoreError> {
    store.insert_row_checked(CommitteeHashRow { raw: *cred.hash(), has_script: cred.is_script() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_core::schema::Table;
    use dbsync_core::store::MemoryStore;
    use dbsync_core::types::Network;

    #[test]
    fn predefined_dreps_are_distinct_rows() {
        let mut store = MemoryStore::new();
        let a = drep_hash_id(&mut store, &DRep::AlwaysAbstain).unwrap();
        let b = drep_hash_id(&mut store, &DRep::AlwaysNoConfidence).unwrap();
        assert_ne!(a, b);
        assert_eq!(drep_hash_id(&mut store, &DRep::AlwaysAbstain).unwrap(), a);
    }

    #[test]
    fn stake_address_is_content_addressed() {
        let cache = EntityCache::disabled();
        let mut store = MemoryStore::new();
        let addr = StakeAddress { network: Network::Testnet, credential: Credential::KeyHash(Hash28([4; 28])) };
        let a = stake_address_id(&cache, &mut store, &addr, CacheAction::Cache).unwrap();
        let b = stake_address_id(&cache, &mut store, &addr, CacheAction::DoNotCache).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.count(Table::StakeAddress).unwrap(), 1);
    }
}
