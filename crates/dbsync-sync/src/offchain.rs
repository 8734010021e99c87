//! Off-chain fetch requests and the rows their results turn into.
//!
//! The pipeline queues a request whenever it inserts a new pool metadata
//! reference or voting anchor; workers outside this crate fetch the document
//! and queue a result, which a later block drains into the store.

use chrono::Utc;
use tracing::debug;

use dbsync_core::error::SyncError;
use dbsync_core::schema::{
    DbId, OffChainPoolDataRow, OffChainPoolFetchErrorRow, OffChainVoteDataRow,
    OffChainVoteFetchErrorRow,
};
use dbsync_core::store::{DbStore, DbStoreExt};
use dbsync_core::types::{Hash28, Hash32};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolFetchRequest {
    pub pool_id: DbId,
    pub pmr_id: DbId,
    pub pool: Hash28,
    pub url: String,
    pub hash: Hash32,
    pub retry_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteFetchRequest {
    pub voting_anchor_id: DbId,
    pub url: String,
    pub hash: Hash32,
    pub retry_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolFetchResult {
    Fetched { request: PoolFetchRequest, ticker: String, json: String, bytes: Vec<u8> },
    Failed { request: PoolFetchRequest, error: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteFetchResult {
    Fetched { request: VoteFetchRequest, json: Option<String>, bytes: Vec<u8>, warning: Option<String> },
    Failed { request: VoteFetchRequest, error: String },
}

/// A request produced while ingesting a block, queued after commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchRequest {
    Pool(PoolFetchRequest),
    Vote(VoteFetchRequest),
}

pub fn insert_pool_result<S: DbStore + ?Sized>(store: &mut S, result: PoolFetchResult) -> Result<(), SyncError> {
    match result {
        PoolFetchResult::Fetched { request, ticker, json, bytes } => {
            debug!(pool = %request.pool, ticker = %ticker, "pool metadata fetched");
            store.insert_row(OffChainPoolDataRow {
                pool_id: request.pool_id,
                ticker_name: ticker,
                hash: request.hash,
                json,
                bytes,
                pmr_id: request.pmr_id,
            })?;
        }
        PoolFetchResult::Failed { request, error } => {
            debug!(pool = %request.pool, url = %request.url, error = %error, "pool metadata fetch failed");
            store.insert_row(OffChainPoolFetchErrorRow {
                pool_id: request.pool_id,
                fetch_time: Utc::now().timestamp(),
                pmr_id: request.pmr_id,
                fetch_error: error,
                retry_count: request.retry_count,
            })?;
        }
    }
    Ok(())
}

pub fn insert_vote_result<S: DbStore + ?Sized>(store: &mut S, result: VoteFetchResult) -> Result<(), SyncError> {
    match result {
        VoteFetchResult::Fetched { request, json, bytes, warning } => {
            store.insert_row(OffChainVoteDataRow {
                voting_anchor_id: request.voting_anchor_id,
                hash: request.hash,
                json,
                bytes,
                warning,
            })?;
        }
        VoteFetchResult::Failed { request, error } => {
            debug!(url = %request.url, error = %error, "vote anchor fetch failed");
            store.insert_row(OffChainVoteFetchErrorRow {
                voting_anchor_id: request.voting_anchor_id,
                fetch_error: error,
                fetch_time: Utc::now().timestamp(),
                retry_count: request.retry_count,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_core::schema::Table;
    use dbsync_core::store::MemoryStore;

    fn request() -> PoolFetchRequest {
        PoolFetchRequest {
            pool_id: 1,
            pmr_id: 2,
            pool: Hash28([1; 28]),
            url: "https://pool.example/meta.json".into(),
            hash: Hash32([2; 32]),
            retry_count: 0,
        }
    }

    #[test]
    fn results_become_rows() {
        let mut store = MemoryStore::new();
        insert_pool_result(
            &mut store,
            PoolFetchResult::Fetched { request: request(), ticker: "POOL".into(), json: "{}".into(), bytes: b"{}".to_vec() },
        )
        .unwrap();
        insert_pool_result(&mut store, PoolFetchResult::Failed { request: request(), error: "timeout".into() }).unwrap();
        assert_eq!(store.count(Table::OffChainPoolData).unwrap(), 1);
        assert_eq!(store.count(Table::OffChainPoolFetchError).unwrap(), 1);
    }
}
