//! Lakesync Core - metadata consistency for CDC-fed lakehouse tables
//!
//! This library keeps lakehouse table metadata consistent across three
//! worlds:
//!
//! - CDC envelopes decoded into typed data / schema change events
//! - Schema evolution via ordered, atomic table-change batches
//! - External metastore mirroring under a distributed advisory lock

pub mod cdc;
pub mod config;
pub mod error;
pub mod lock;
pub mod metastore;
pub mod partition;
pub mod schema;

// Re-export commonly used types
pub use config::Config;
pub use error::{CatalogError, CdcError, LockError, SchemaError};
pub use error::{Error, Result};
