//! # dbsync-sync
//! Block ingestion pipeline, entity cache, and shared sync state for DBSync.

pub mod batch;
pub mod block;
pub mod cache;
pub mod certificate;
pub mod consistency;
pub mod entities;
pub mod epoch;
pub mod governance;
pub mod offchain;
pub mod queue;
pub mod rollback;
pub mod state;
pub mod tx;
