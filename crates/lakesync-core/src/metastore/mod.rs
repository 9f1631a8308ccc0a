//! Metastore synchronization.
//!
//! Mirrors catalog state (databases, tables, schemas, partitions) into an
//! external metastore so engines that only speak the metastore protocol can
//! query the tables. Every mutating operation runs under a distributed
//! advisory lock scoped to the affected resource.

mod client;
mod ident;
mod sync;

pub use client::{CatalogIdentifier, MemoryMetastore, MetastoreClient, TableDescriptor};
pub use ident::{validate_database_name, validate_field_names, validate_table_name};
pub use sync::{
    CommitSnapshot, MetastoreSynchronizer, TableSpec, OPT_METASTORE_PARTITIONED,
    OPT_PARTITION_KEYS, OPT_PRIMARY_KEYS, OPT_TABLE_TYPE, OPT_TAG_TO_PARTITION,
    OPT_TAG_TO_PARTITION_PREVIEW,
};
