//! # dbsync-node
//! Runtime composition for DBSync: RocksDB storage, config, the block feed,
//! off-chain workers, and the status RPC.
//!
//! - [`storage::RocksStore`]: `DbStore` backed by RocksDB
//! - [`config::SyncConfig`]: layered configuration
//! - [`feed`]: JSON-lines block feed
//! - [`fetch`]: off-chain document workers
//! - [`node::SyncNode`]: startup sequence and ingestion driver
//! - [`rpc`]: JSON-RPC status server

pub mod config;
pub mod feed;
pub mod fetch;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::SyncConfig;
pub use node::SyncNode;
pub use rpc::start_rpc_server;
pub use storage::RocksStore;
