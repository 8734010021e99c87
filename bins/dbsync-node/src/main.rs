//! DBSync node binary.
//!
//! Opens the RocksDB store, ingests a JSON-lines block feed, runs the
//! off-chain fetch workers, and serves sync status over JSON-RPC.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use dbsync_core::types::Network;
use dbsync_node_lib::config::LogFormat;
use dbsync_node_lib::feed::FeedReader;
use dbsync_node_lib::fetch::{run_pool_worker, run_vote_worker, HttpFetcher, OffChainFetcher};
use dbsync_node_lib::node::{FeedSummary, NodeError};
use dbsync_node_lib::{start_rpc_server, SyncConfig, SyncNode};
use dbsync_sync::cache::CacheSizes;

#[derive(Parser, Debug)]
#[command(name = "dbsync-node", version, about = "Project a validated block feed into a relational store")]
struct Args {
    /// Config file (TOML, YAML, or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON-lines block feed to ingest
    #[arg(long)]
    feed: Option<PathBuf>,

    /// JSON-RPC status server address, e.g. 127.0.0.1:8090
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Security parameter k
    #[arg(long)]
    security_param: Option<u64>,

    /// Use testnet address encoding
    #[arg(long)]
    testnet: bool,

    /// Disable ledger-derived data (deposits, rewards, stake snapshots)
    #[arg(long)]
    disable_ledger: bool,

    /// Record consumed-by on outputs
    #[arg(long)]
    consumed_tx_out: bool,

    /// Prune consumed outputs
    #[arg(long)]
    prune_tx_out: bool,

    /// Defer UTxO population until the tip
    #[arg(long)]
    bootstrap_tx_out: bool,

    /// Disable every entity cache (output is unchanged)
    #[arg(long)]
    no_cache: bool,
}

impl Args {
    /// Load the layered config and apply CLI overrides on top.
    fn into_config(self) -> anyhow::Result<SyncConfig> {
        let mut config = SyncConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(feed) = self.feed {
            config.feed = Some(feed);
        }
        if let Some(addr) = self.rpc_addr {
            config.rpc_addr = Some(addr);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = if format == "json" { LogFormat::Json } else { LogFormat::Text };
        }
        if let Some(k) = self.security_param {
            config.security_param = k;
        }
        if self.testnet {
            config.network = Network::Testnet;
        }
        if self.disable_ledger {
            config.options.use_ledger_data = false;
        }
        config.tx_out.consumed |= self.consumed_tx_out;
        config.tx_out.prune |= self.prune_tx_out;
        config.tx_out.bootstrap |= self.bootstrap_tx_out;
        if self.no_cache {
            config.cache = CacheSizes::disabled();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e:#}");
        eprintln!("dbsync-node: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log_level, config.log_format);

    info!("DBSync node v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = ?config.data_dir, network = ?config.network, k = config.security_param, "configuration");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {}", config.data_dir.display()))?;
    let feed_path = config.feed.clone().context("no block feed configured (--feed)")?;

    let node = SyncNode::open(&config).context("failed to start sync node")?;
    let env = node.env().clone();
    if let Some(tip) = env.state.db_tip() {
        info!(block_no = tip.block_no, hash = %hex::encode(tip.hash.as_bytes()), "db tip");
    }

    let mut workers = Vec::new();
    if config.options.offchain_pool_data || config.options.governance {
        let fetcher: Arc<dyn OffChainFetcher> = Arc::new(HttpFetcher::new()?);
        if config.options.offchain_pool_data {
            workers.push(tokio::spawn(run_pool_worker(fetcher.clone(), env.clone())));
        }
        if config.options.governance {
            workers.push(tokio::spawn(run_vote_worker(fetcher, env.clone())));
        }
    }

    let rpc = match &config.rpc_addr {
        Some(addr) => Some(start_rpc_server(addr, env.clone()).await?),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let mut ingest = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || -> Result<FeedSummary, NodeError> {
            let mut node = node;
            let summary = node.run_feed(FeedReader::open(&feed_path)?, &stop)?;
            node.into_store().flush()?;
            Ok(summary)
        })
    };

    info!("ingesting (Ctrl+C to stop)");
    let finished = tokio::select! {
        res = &mut ingest => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(res) => res,
        None => {
            info!("received Ctrl+C, stopping after the current block");
            stop.store(true, Ordering::Release);
            ingest.await
        }
    };

    for worker in workers {
        worker.abort();
    }
    if let Some(handle) = rpc {
        handle.stop().ok();
    }

    let summary = result.context("ingestion task failed")??;
    info!(blocks = summary.blocks, rollbacks = summary.rollbacks, stopped = summary.stopped, "shutdown complete");
    Ok(())
}

/// Initialize tracing with `RUST_LOG` taking precedence over `level`.
fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init(),
    }
}
