//! End-to-end ingestion tests for DBSync.
//!
//! Integration tests drive whole blocks through the pipeline against the
//! in-memory and RocksDB stores and check the resulting rows.

pub mod helpers;
