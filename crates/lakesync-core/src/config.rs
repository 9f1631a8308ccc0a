//! Configuration structures for lakesync.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix for catalog options that are inherited by every table created through
/// the synchronizer. The prefix is stripped before the option lands on the table.
pub const TABLE_DEFAULT_PREFIX: &str = "table-default.";

/// Prefix for operational lock options. These are never propagated to tables.
pub const LOCK_OPTION_PREFIX: &str = "lock.";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Catalog / metastore configuration
    pub catalog: CatalogConfig,

    /// Distributed lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// CDC stream configuration
    #[serde(default)]
    pub cdc: CdcConfig,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Table ownership semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    /// Dropping the table also removes its storage location
    #[default]
    Managed,
    /// Dropping the table leaves the storage location untouched
    External,
}

impl TableType {
    /// Parse the `table.type` option value, case-insensitively.
    pub fn parse_option(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "managed" => Some(TableType::Managed),
            "external" => Some(TableType::External),
            _ => None,
        }
    }
}

/// Catalog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog name, used in error messages and lock resource keys
    pub name: String,

    /// Warehouse root URI for table storage locations
    pub warehouse: String,

    /// Default ownership for newly created tables
    #[serde(default)]
    pub table_type: TableType,

    /// Default database
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Raw catalog options. Options under `table-default.` are inherited by
    /// every created table; options under `lock.` stay operational.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl CatalogConfig {
    /// Options inherited by newly created tables, with the
    /// `table-default.` prefix stripped.
    pub fn table_default_options(&self) -> HashMap<String, String> {
        self.options
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(TABLE_DEFAULT_PREFIX)
                    .filter(|stripped| !stripped.starts_with(LOCK_OPTION_PREFIX))
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Distributed lock configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Lease duration in milliseconds; a crashed holder is evicted after this
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Maximum acquisition attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Add ±25% jitter to backoff delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ms: default_lease_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// CDC stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CdcConfig {
    /// Only process events whose source database matches (all if unset)
    pub database: Option<String>,

    /// Only process events whose source table matches (all if unset)
    pub table: Option<String>,
}

fn default_database() -> String {
    "default".to_string()
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    50
}

fn default_base_delay_ms() -> u64 {
    20
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_jitter() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.catalog.name.is_empty() {
            return Err(crate::Error::Config("Catalog name is required".into()));
        }

        if self.catalog.warehouse.is_empty() {
            return Err(crate::Error::Config("Warehouse path is required".into()));
        }

        if self.lock.max_retries == 0 {
            return Err(crate::Error::Config(
                "Lock max_retries must be at least 1".into(),
            ));
        }

        if self.lock.base_delay_ms > self.lock.max_delay_ms {
            return Err(crate::Error::Config(
                "Lock base_delay_ms cannot exceed max_delay_ms".into(),
            ));
        }

        Ok(())
    }
}
