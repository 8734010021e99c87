//! JSON-RPC status server.
//!
//! Uses jsonrpsee 0.24. Only reads the shared [`SyncEnv`], so serving
//! requests never waits on block ingestion.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;

use dbsync_sync::state::SyncEnv;

use crate::node::{status, NodeError, SyncStatus};

#[rpc(server)]
pub trait DbSyncRpc {
    /// Consistency level, DB tip, bootstrap flag, queue depths, and cache
    /// statistics.
    #[method(name = "dbsync_status")]
    async fn status(&self) -> Result<SyncStatus, ErrorObjectOwned>;
}

pub struct RpcServerImpl {
    env: Arc<SyncEnv>,
}

impl RpcServerImpl {
    pub fn new(env: Arc<SyncEnv>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl DbSyncRpcServer for RpcServerImpl {
    async fn status(&self) -> Result<SyncStatus, ErrorObjectOwned> {
        Ok(status(&self.env))
    }
}

/// Bind `addr` and serve the status method until the handle is stopped.
pub async fn start_rpc_server(addr: &str, env: Arc<SyncEnv>) -> Result<ServerHandle, NodeError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| NodeError::Rpc(format!("RPC server error: {e}")))?;
    let handle = server.start(RpcServerImpl::new(env).into_rpc());
    tracing::info!(addr, "rpc server listening");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_sync::state::{ConsistencyLevel, SyncSettings};

    #[tokio::test]
    async fn status_reflects_shared_state() {
        let env = Arc::new(SyncEnv::new(SyncSettings::default()));
        env.state.set_consistency(ConsistencyLevel::DbBehindChain);
        let rpc = RpcServerImpl::new(env);
        let status = DbSyncRpcServer::status(&rpc).await.unwrap();
        assert_eq!(status.consistency, ConsistencyLevel::DbBehindChain);
        assert_eq!(status.queues.len(), 4);
        assert!(status.db_tip.is_none());
    }

    #[tokio::test]
    async fn server_binds_ephemeral_port() {
        let env = Arc::new(SyncEnv::new(SyncSettings::default()));
        let handle = start_rpc_server("127.0.0.1:0", env).await.unwrap();
        handle.stop().unwrap();
    }
}
