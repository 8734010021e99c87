//! Off-chain document fetching.
//!
//! Workers pop requests from the work queues, fetch the URL through an
//! [`OffChainFetcher`], verify the document against the on-chain hash, and
//! push a result for the pipeline to insert with a later block.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use thiserror::Error;
use tracing::{debug, warn};

use dbsync_core::constants::MAX_OFFCHAIN_BYTES;
use dbsync_core::types::Hash32;
use dbsync_sync::offchain::{PoolFetchRequest, PoolFetchResult, VoteFetchRequest, VoteFetchResult};
use dbsync_sync::state::SyncEnv;

type Blake2b256 = Blake2b<U32>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),
    #[error("http: {0}")]
    Http(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("document larger than {0} bytes")]
    TooLarge(usize),
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("pool metadata has no ticker")]
    MissingTicker,
}

/// Source of off-chain documents.
#[async_trait]
pub trait OffChainFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) fetcher with a response size cap.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self { client, max_bytes: MAX_OFFCHAIN_BYTES })
    }
}

#[async_trait]
impl OffChainFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::UnsupportedUrl(url.to_string()));
        }
        let mut resp = self.client.get(url).send().await.map_err(|e| FetchError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        if resp.content_length().is_some_and(|len| len as usize > self.max_bytes) {
            return Err(FetchError::TooLarge(self.max_bytes));
        }
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| FetchError::Http(e.to_string()))? {
            body.extend_from_slice(&chunk);
            if body.len() > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
        }
        Ok(body)
    }
}

pub fn blake2b_256(bytes: &[u8]) -> Hash32 {
    Hash32(Blake2b256::digest(bytes).into())
}

fn verify_hash(expected: &Hash32, body: &[u8]) -> Result<(), FetchError> {
    let actual = blake2b_256(body);
    if &actual != expected {
        return Err(FetchError::HashMismatch { expected: expected.to_hex(), actual: actual.to_hex() });
    }
    Ok(())
}

/// Turn a fetched pool metadata document into a result row payload.
pub fn pool_result(request: PoolFetchRequest, body: Result<Vec<u8>, FetchError>) -> PoolFetchResult {
    let parsed = body.and_then(|bytes| {
        verify_hash(&request.hash, &bytes)?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::InvalidJson(e.to_string()))?;
        let ticker = value.get("ticker").and_then(|t| t.as_str()).ok_or(FetchError::MissingTicker)?.to_string();
        Ok((ticker, value.to_string(), bytes))
    });
    match parsed {
        Ok((ticker, json, bytes)) => PoolFetchResult::Fetched { request, ticker, json, bytes },
        Err(err) => PoolFetchResult::Failed { request, error: err.to_string() },
    }
}

/// Turn a fetched vote anchor document into a result payload. Documents
/// that are not JSON are kept with a warning.
pub fn vote_result(request: VoteFetchRequest, body: Result<Vec<u8>, FetchError>) -> VoteFetchResult {
    match body.and_then(|bytes| verify_hash(&request.hash, &bytes).map(|()| bytes)) {
        Ok(bytes) => {
            let (json, warning) = match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => (Some(value.to_string()), None),
                Err(e) => (None, Some(format!("not json: {e}"))),
            };
            VoteFetchResult::Fetched { request, json, bytes, warning }
        }
        Err(err) => VoteFetchResult::Failed { request, error: err.to_string() },
    }
}

pub async fn fetch_pool<F: OffChainFetcher + ?Sized>(fetcher: &F, request: PoolFetchRequest) -> PoolFetchResult {
    let body = fetcher.fetch(&request.url).await;
    pool_result(request, body)
}

pub async fn fetch_vote<F: OffChainFetcher + ?Sized>(fetcher: &F, request: VoteFetchRequest) -> VoteFetchResult {
    let body = fetcher.fetch(&request.url).await;
    vote_result(request, body)
}

/// Serve the pool metadata queue until it closes.
pub async fn run_pool_worker(fetcher: Arc<dyn OffChainFetcher>, env: Arc<SyncEnv>) {
    while let Some(request) = env.queues.pool_work.pop().await {
        debug!(pool = %request.pool, url = %request.url, "fetching pool metadata");
        let result = fetch_pool(fetcher.as_ref(), request).await;
        if env.queues.pool_results.push_async(result).await.is_err() {
            warn!("pool result queue closed");
            break;
        }
    }
}

/// Serve the vote anchor queue until it closes.
pub async fn run_vote_worker(fetcher: Arc<dyn OffChainFetcher>, env: Arc<SyncEnv>) {
    while let Some(request) = env.queues.vote_work.pop().await {
        debug!(url = %request.url, "fetching vote anchor");
        let result = fetch_vote(fetcher.as_ref(), request).await;
        if env.queues.vote_results.push_async(result).await.is_err() {
            warn!("vote result queue closed");
            break;
        }
    }
}
