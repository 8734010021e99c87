//! Bounded FIFO queues between the ingestion pipeline and off-chain workers.
//!
//! Producers block when a queue is full; consumers drain without blocking.
//! The blocking push must run outside an async context (the ingestion loop
//! runs on a blocking thread).
//!
//! A worker blocked on a full result queue stops serving its work queue, so
//! the pipeline parks pending results while it waits for work-queue space.
//! Parked results are inserted with the next block like any other result.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Mutex;

use dbsync_core::constants::QUEUE_CAPACITY;
use dbsync_core::error::SyncError;

use crate::offchain::{FetchRequest, PoolFetchRequest, PoolFetchResult, VoteFetchRequest, VoteFetchResult};

const PUSH_BACKOFF_MIN: Duration = Duration::from_millis(1);
const PUSH_BACKOFF_MAX: Duration = Duration::from_millis(50);

pub struct BoundedQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T: Send> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { name, tx, rx: Mutex::new(rx) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Push, blocking the calling thread while the queue is full.
    pub fn push(&self, item: T) -> Result<(), SyncError> {
        self.tx.blocking_send(item).map_err(|_| SyncError::QueueClosed(self.name))
    }

    /// Push, blocking the calling thread while the queue is full. `relieve`
    /// runs before every wait.
    pub fn push_relieving(&self, mut item: T, mut relieve: impl FnMut()) -> Result<(), SyncError> {
        let mut backoff = PUSH_BACKOFF_MIN;
        loop {
            match self.try_push(item)? {
                None => return Ok(()),
                Some(back) => item = back,
            }
            relieve();
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(PUSH_BACKOFF_MAX);
        }
    }

    /// Push without blocking. Returns the item back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<Option<T>, SyncError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(item)) => Ok(Some(item)),
            Err(TrySendError::Closed(_)) => Err(SyncError::QueueClosed(self.name)),
        }
    }

    /// Push from async code, waiting for space.
    pub async fn push_async(&self, item: T) -> Result<(), SyncError> {
        self.tx.send(item).await.map_err(|_| SyncError::QueueClosed(self.name))
    }

    /// Wait for the next item.
    pub async fn pop(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Next item if one is ready and no other consumer holds the queue.
    pub fn try_pop(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// The two work queues and their result queues.
pub struct OffChainQueues {
    pub pool_work: BoundedQueue<PoolFetchRequest>,
    pub pool_results: BoundedQueue<PoolFetchResult>,
    pub vote_work: BoundedQueue<VoteFetchRequest>,
    pub vote_results: BoundedQueue<VoteFetchResult>,
    parked_pool: parking_lot::Mutex<Vec<PoolFetchResult>>,
    parked_vote: parking_lot::Mutex<Vec<VoteFetchResult>>,
}

impl OffChainQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool_work: BoundedQueue::new("pool_work", capacity),
            pool_results: BoundedQueue::new("pool_results", capacity),
            vote_work: BoundedQueue::new("vote_work", capacity),
            vote_results: BoundedQueue::new("vote_results", capacity),
            parked_pool: parking_lot::Mutex::new(Vec::new()),
            parked_vote: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Queue a fetch request, waiting for room. Results that arrive while
    /// waiting are parked so the workers keep consuming.
    pub fn queue_fetch(&self, request: FetchRequest) -> Result<(), SyncError> {
        match request {
            FetchRequest::Pool(r) => self.pool_work.push_relieving(r, || self.park_results()),
            FetchRequest::Vote(r) => self.vote_work.push_relieving(r, || self.park_results()),
        }
    }

    /// Move every ready result out of the result queues.
    pub fn park_results(&self) {
        self.parked_pool.lock().extend(self.pool_results.drain());
        self.parked_vote.lock().extend(self.vote_results.drain());
    }

    /// Parked pool results followed by the queued ones, in arrival order.
    pub fn take_pool_results(&self) -> Vec<PoolFetchResult> {
        let mut results = std::mem::take(&mut *self.parked_pool.lock());
        results.extend(self.pool_results.drain());
        results
    }

    pub fn take_vote_results(&self) -> Vec<VoteFetchResult> {
        let mut results = std::mem::take(&mut *self.parked_vote.lock());
        results.extend(self.vote_results.drain());
        results
    }

    /// Queue depths as `(name, len)` pairs. Result depths include parked
    /// results.
    pub fn depths(&self) -> [(&'static str, usize); 4] {
        [
            (self.pool_work.name(), self.pool_work.len()),
            (self.pool_results.name(), self.pool_results.len() + self.parked_pool.lock().len()),
            (self.vote_work.name(), self.vote_work.len()),
            (self.vote_results.name(), self.vote_results.len() + self.parked_vote.lock().len()),
        ]
    }
}

impl Default for OffChainQueues {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}
