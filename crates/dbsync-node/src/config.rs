//! Sync configuration.
//!
//! [`SyncConfig`] is layered from an optional config file (TOML, YAML, or
//! JSON, by extension) under `DBSYNC_`-prefixed environment variables; the
//! binary applies CLI overrides on top. Nested keys use `__` in variable
//! names, e.g. `DBSYNC_OPTIONS__GOVERNANCE=false`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dbsync_core::constants::{DEFAULT_REVERSE_INDEX_WINDOW, DEFAULT_SECURITY_PARAM, QUEUE_CAPACITY};
use dbsync_core::error::ConfigError;
use dbsync_core::options::{InsertOptions, TxOutOptions};
use dbsync_core::types::Network;
use dbsync_sync::cache::CacheSizes;
use dbsync_sync::state::SyncSettings;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// JSON-lines block feed to ingest.
    pub feed: Option<PathBuf>,
    /// Ledger state snapshots; only meaningful with ledger data enabled.
    pub ledger_state_dir: Option<PathBuf>,
    /// Log level filter string (e.g. "info", "dbsync_sync=debug").
    pub log_level: String,
    pub log_format: LogFormat,
    /// Address of the JSON-RPC status server; `None` disables it.
    pub rpc_addr: Option<String>,
    pub network: Network,
    pub security_param: u64,
    pub options: InsertOptions,
    pub tx_out: TxOutOptions,
    pub cache: CacheSizes,
    /// Keep per-block diffs for epoch row aggregation.
    pub epoch_cache: bool,
    pub reverse_index_window: u64,
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("dbsync");
        Self {
            data_dir,
            feed: None,
            ledger_state_dir: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            rpc_addr: None,
            network: Network::Mainnet,
            security_param: DEFAULT_SECURITY_PARAM,
            options: InsertOptions::default(),
            tx_out: TxOutOptions::default(),
            cache: CacheSizes::default(),
            epoch_cache: true,
            reverse_index_window: DEFAULT_REVERSE_INDEX_WINDOW,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Load from `file` (optional) and the environment, then validate.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: SyncConfig = builder
            .add_source(
                config::Environment::with_prefix("DBSYNC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::InvalidOption { key: "config".into(), reason: e.to_string() })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject option combinations the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security_param == 0 {
            return Err(ConfigError::ZeroSecurityParam);
        }
        if !self.options.use_ledger_data && self.ledger_state_dir.is_some() {
            return Err(ConfigError::LedgerDirWithoutLedger);
        }
        if self.tx_out.bootstrap && !self.options.use_ledger_data {
            return Err(ConfigError::BootstrapWithoutLedger);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidOption {
                key: "queue_capacity".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Path to the RocksDB data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            network: self.network,
            security_param: self.security_param,
            options: self.options.clone(),
            tx_out: self.tx_out,
            cache_sizes: self.cache,
            epoch_cache: self.epoch_cache,
            reverse_index_window: self.reverse_index_window,
            queue_capacity: self.queue_capacity,
        }
    }
}
