//! JSON-lines block feed.
//!
//! Each non-empty line is one [`FeedItem`]. Lines starting with `#` are
//! comments.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dbsync_core::ledger::ApplyResult;
use dbsync_core::types::{Block, Hash32};
use dbsync_sync::consistency::BootstrapUtxo;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedItem {
    /// A validated block with the ledger's view of it.
    RollForward {
        block: Block,
        #[serde(default)]
        apply: ApplyResult,
        /// Chain tip height when the block was served.
        #[serde(default)]
        tip: Option<u64>,
    },
    /// Roll back to `point`; `None` is the chain origin.
    RollBack { point: Option<Hash32> },
    /// The ledger UTxO set that ends a bootstrap.
    BootstrapUtxo { utxo: Vec<BootstrapUtxo> },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed io: {0}")]
    Io(#[from] std::io::Error),
    #[error("feed line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse one feed line. Blank and comment lines yield `None`.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<FeedItem>, FeedError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| FeedError::Parse { line: line_no, source })
}

/// Sequential reader over a feed file.
pub struct FeedReader<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl FeedReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> FeedReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0 }
    }

    /// Lines consumed so far.
    pub fn position(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for FeedReader<R> {
    type Item = Result<FeedItem, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            match parse_line(self.line_no, &line) {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Append items to a feed, one JSON object per line.
pub fn write_feed<W: Write>(mut out: W, items: &[FeedItem]) -> Result<(), FeedError> {
    for item in items {
        let line = serde_json::to_string(item).map_err(|source| FeedError::Parse { line: 0, source })?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}
