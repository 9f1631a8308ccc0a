//! Error types for the lakesync core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for lakesync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for lakesync.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// CDC envelope or history decoding error
    #[error("CDC error: {0}")]
    Cdc(#[from] CdcError),

    /// Schema evolution error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Catalog / metastore error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Distributed lock error
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// CDC decoding errors.
#[derive(Error, Debug)]
pub enum CdcError {
    /// Envelope is not valid JSON or is missing required fields
    #[error("Malformed change event: {reason}")]
    MalformedEvent { reason: String },

    /// Serialized schema-history payload could not be decoded
    #[error("History record decode failed: {reason}")]
    HistoryDecode { reason: String },
}

impl CdcError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    pub fn history(reason: impl Into<String>) -> Self {
        Self::HistoryDecode {
            reason: reason.into(),
        }
    }
}

/// Schema evolution errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A table change cannot be applied to the current schema
    #[error("Cannot apply {operation}: {reason}")]
    Conflict { operation: String, reason: String },
}

/// Catalog and metastore errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Identifier contains upper-case characters
    #[error("{kind} name [{name}] cannot contain upper case in the catalog.")]
    InvalidIdentifier { kind: &'static str, name: String },

    /// Database already exists
    #[error("Database {database} already exists in catalog {catalog}.")]
    DatabaseAlreadyExists { database: String, catalog: String },

    /// Database does not exist
    #[error("Database {database} does not exist in catalog {catalog}.")]
    DatabaseNotExists { database: String, catalog: String },

    /// Database still contains tables and cascade was not requested
    #[error("Database {database} in catalog {catalog} is not empty.")]
    DatabaseNotEmpty { database: String, catalog: String },

    /// Table already exists
    #[error("Table {identifier} already exists in catalog {catalog}.")]
    TableAlreadyExists { identifier: String, catalog: String },

    /// Table does not exist
    #[error("Table {identifier} does not exist in catalog {catalog}.")]
    TableNotExists { identifier: String, catalog: String },

    /// Rename target is already taken
    #[error("Cannot rename table {from} to {to}: target table already exists in catalog {catalog}.")]
    RenameTargetExists {
        from: String,
        to: String,
        catalog: String,
    },

    /// The same constraint is declared both on the DDL and as a table option
    #[error("Cannot define {clause} on DDL and table options at the same time.")]
    ConflictingOptions { clause: &'static str },

    /// Declared partition / primary-key fields are not a subset of the columns
    #[error("Table column [{columns}] should include all {constraint} [{keys}]")]
    KeysNotInColumns {
        columns: String,
        constraint: &'static str,
        keys: String,
    },

    /// Underlying metastore failure
    #[error("Metastore error: {0}")]
    Metastore(String),
}

/// Distributed lock errors.
#[derive(Error, Debug)]
pub enum LockError {
    /// Lock could not be acquired within the retry budget
    #[error("Lock on {resource} not acquired after {attempts} attempts")]
    Timeout { resource: String, attempts: u32 },

    /// Lock backend failure
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
