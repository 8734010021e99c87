//! Error types for DBSync.
use thiserror::Error;

use crate::types::Era;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ledger state directory set while ledger data is disabled")] LedgerDirWithoutLedger,
    #[error("bootstrap requires ledger data")] BootstrapWithoutLedger,
    #[error("security parameter must be positive")] ZeroSecurityParam,
    #[error("conflicting genesis parameters: {0}")] ConflictingGenesis(String),
    #[error("invalid option {key}: {reason}")] InvalidOption { key: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("bootstrap is in progress in the database but the bootstrap flag is not set")] BootstrapFlagMissing,
    #[error("unknown bootstrap state marker: {0}")] UnknownBootstrapState(String),
    #[error("bootstrap UTxO supplied while no bootstrap is in progress")] NoBootstrapInProgress,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("previous block not found: {0}")] PreviousBlock(String),
    #[error("block not found: {0}")] Block(String),
    #[error("transaction not found: {0}")] Tx(String),
    #[error("tx output not found: {tx}#{index}")] TxOut { tx: String, index: u64 },
    #[error("redeemer not found: {purpose} #{index}")] Redeemer { purpose: String, index: u32 },
    #[error("governance action not found: {0}")] GovAction(String),
    #[error("governance action {id} has purpose {found}, expected {expected}")] GovActionPurpose { id: String, found: String, expected: String },
    #[error("no reverse index for block {0}")] ReverseIndex(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated on {table}")] UniqueViolation { table: String },
    #[error("row {id} missing from {table}")] MissingRow { table: String, id: u64 },
    #[error("row type does not belong to {0}")] WrongTable(String),
    #[error("transaction already open")] TxnAlreadyOpen,
    #[error("no open transaction")] NoOpenTxn,
    #[error("storage: {0}")] Backend(String),
    #[error("codec: {0}")] Codec(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Consistency(#[from] ConsistencyError),
    #[error(transparent)] Lookup(#[from] LookupError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("queue closed: {0}")] QueueClosed(&'static str),
    #[error("cannot encode {what}: {reason}")] Encode { what: &'static str, reason: String },
    #[error("block {hash} ({era}) failed in {routine}: {source}")] Block { hash: String, era: Era, routine: &'static str, #[source] source: Box<SyncError> },
}

impl SyncError {
    /// Wrap an error with the block and routine it surfaced from.
    ///
    /// An error that already carries block context is returned unchanged, so
    /// the innermost routine name is the one reported.
    pub fn in_block(self, hash: String, era: Era, routine: &'static str) -> Self {
        match self {
            err @ SyncError::Block { .. } => err,
            other => SyncError::Block { hash, era, routine, source: Box::new(other) },
        }
    }

    /// The error with any block context stripped.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Block { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_block_wraps_once() {
        let err = SyncError::from(LookupError::Tx("aa".into()))
            .in_block("bb".into(), Era::Shelley, "insert_tx")
            .in_block("bb".into(), Era::Shelley, "insert_block");
        let msg = err.to_string();
        assert!(msg.contains("insert_tx"), "{msg}");
        assert!(!msg.contains("insert_block"), "{msg}");
        assert!(matches!(err.root(), SyncError::Lookup(LookupError::Tx(_))));
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::UniqueViolation { table: "block".into() };
        assert_eq!(err.to_string(), "unique constraint violated on block");
    }
}
