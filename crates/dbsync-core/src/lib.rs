//! # dbsync-core
//! Chain input types, the relational row catalog, and the storage contract.

pub mod cbor;
pub mod certs;
pub mod constants;
pub mod epoch;
pub mod error;
pub mod gov;
pub mod ledger;
pub mod options;
pub mod schema;
pub mod store;
pub mod types;
