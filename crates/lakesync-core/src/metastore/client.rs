//! Metastore client trait and the in-memory implementation.

use crate::config::TableType;
use crate::error::{CatalogError, Result};
use crate::partition::PartitionSpec;
use crate::schema::TableSchema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogIdentifier {
    pub database: String,
    pub table: String,
}

impl CatalogIdentifier {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

impl fmt::Display for CatalogIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Table record as mirrored into the metastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub identifier: CatalogIdentifier,
    pub schema: TableSchema,
    pub location: String,
    pub table_type: TableType,
    pub created_at: DateTime<Utc>,
}

/// Operations a metastore must support.
///
/// Implementations map their native failures onto [`CatalogError`]; callers
/// rely on the exact variants for existence checks. `add_partitions` is
/// idempotent: a partition that already exists is silently skipped, so a
/// concurrent synchronizer adding the same partition is never an error.
#[async_trait]
pub trait MetastoreClient: Send + Sync {
    /// Catalog name, used in error messages.
    fn catalog_name(&self) -> &str;

    async fn create_database(&self, name: &str) -> Result<()>;

    /// Drop a database. Without `cascade` the database must be empty; with
    /// `cascade` its tables and partitions are removed too.
    async fn drop_database(&self, name: &str, cascade: bool) -> Result<()>;

    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Database names in sorted order.
    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn create_table(&self, descriptor: TableDescriptor) -> Result<()>;

    async fn drop_table(&self, id: &CatalogIdentifier) -> Result<()>;

    async fn rename_table(&self, from: &CatalogIdentifier, to: &CatalogIdentifier) -> Result<()>;

    async fn alter_table_schema(&self, id: &CatalogIdentifier, schema: TableSchema) -> Result<()>;

    async fn get_table(&self, id: &CatalogIdentifier) -> Result<TableDescriptor>;

    async fn table_exists(&self, id: &CatalogIdentifier) -> Result<bool>;

    /// Table names within a database, in sorted order.
    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;

    async fn add_partitions(&self, id: &CatalogIdentifier, specs: &[PartitionSpec]) -> Result<()>;

    /// Remove a partition. Removing an absent partition is not an error.
    async fn drop_partition(&self, id: &CatalogIdentifier, spec: &PartitionSpec) -> Result<()>;

    async fn list_partitions(&self, id: &CatalogIdentifier) -> Result<Vec<PartitionSpec>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    databases: BTreeSet<String>,
    tables: BTreeMap<String, TableDescriptor>,
    partitions: HashMap<String, Vec<PartitionSpec>>,
}

/// In-process metastore.
///
/// Backs tests and single-process deployments. All multi-structure updates
/// happen under one writer lock, so database and table state never diverge.
#[derive(Debug)]
pub struct MemoryMetastore {
    catalog_name: String,
    state: RwLock<MemoryState>,
}

impl MemoryMetastore {
    pub fn new(catalog_name: impl Into<String>) -> Self {
        Self {
            catalog_name: catalog_name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn database_not_exists(&self, name: &str) -> CatalogError {
        CatalogError::DatabaseNotExists {
            database: name.to_string(),
            catalog: self.catalog_name.clone(),
        }
    }

    fn table_not_exists(&self, id: &CatalogIdentifier) -> CatalogError {
        CatalogError::TableNotExists {
            identifier: id.full_name(),
            catalog: self.catalog_name.clone(),
        }
    }
}

#[async_trait]
impl MetastoreClient for MemoryMetastore {
    fn catalog_name(&self) -> &str {
        &self.catalog_name
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if !state.databases.insert(name.to_string()) {
            return Err(CatalogError::DatabaseAlreadyExists {
                database: name.to_string(),
                catalog: self.catalog_name.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str, cascade: bool) -> Result<()> {
        let mut state = self.state.write();
        if !state.databases.contains(name) {
            return Err(self.database_not_exists(name).into());
        }
        let prefix = format!("{name}.");
        let members: Vec<String> = state
            .tables
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        if !members.is_empty() && !cascade {
            return Err(CatalogError::DatabaseNotEmpty {
                database: name.to_string(),
                catalog: self.catalog_name.clone(),
            }
            .into());
        }
        for key in members {
            state.tables.remove(&key);
            state.partitions.remove(&key);
        }
        state.databases.remove(name);
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.read().databases.contains(name))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.state.read().databases.iter().cloned().collect())
    }

    async fn create_table(&self, descriptor: TableDescriptor) -> Result<()> {
        let mut state = self.state.write();
        let id = descriptor.identifier.clone();
        if !state.databases.contains(&id.database) {
            return Err(self.database_not_exists(&id.database).into());
        }
        let key = id.full_name();
        if state.tables.contains_key(&key) {
            return Err(CatalogError::TableAlreadyExists {
                identifier: key,
                catalog: self.catalog_name.clone(),
            }
            .into());
        }
        state.tables.insert(key, descriptor);
        Ok(())
    }

    async fn drop_table(&self, id: &CatalogIdentifier) -> Result<()> {
        let mut state = self.state.write();
        let key = id.full_name();
        if state.tables.remove(&key).is_none() {
            return Err(self.table_not_exists(id).into());
        }
        state.partitions.remove(&key);
        Ok(())
    }

    async fn rename_table(&self, from: &CatalogIdentifier, to: &CatalogIdentifier) -> Result<()> {
        let mut state = self.state.write();
        let from_key = from.full_name();
        let to_key = to.full_name();
        if !state.tables.contains_key(&from_key) {
            return Err(self.table_not_exists(from).into());
        }
        if state.tables.contains_key(&to_key) {
            return Err(CatalogError::RenameTargetExists {
                from: from_key,
                to: to_key,
                catalog: self.catalog_name.clone(),
            }
            .into());
        }
        let mut descriptor = match state.tables.remove(&from_key) {
            Some(d) => d,
            None => return Err(self.table_not_exists(from).into()),
        };
        // location follows the `{warehouse}/{db}.db/{table}` layout
        if let Some(prefix) = descriptor.location.strip_suffix(&from.table) {
            descriptor.location = format!("{prefix}{}", to.table);
        }
        descriptor.identifier = to.clone();
        state.tables.insert(to_key.clone(), descriptor);
        if let Some(specs) = state.partitions.remove(&from_key) {
            state.partitions.insert(to_key, specs);
        }
        Ok(())
    }

    async fn alter_table_schema(&self, id: &CatalogIdentifier, schema: TableSchema) -> Result<()> {
        let mut state = self.state.write();
        let key = id.full_name();
        match state.tables.get_mut(&key) {
            Some(descriptor) => {
                descriptor.schema = schema;
                Ok(())
            }
            None => Err(self.table_not_exists(id).into()),
        }
    }

    async fn get_table(&self, id: &CatalogIdentifier) -> Result<TableDescriptor> {
        self.state
            .read()
            .tables
            .get(&id.full_name())
            .cloned()
            .ok_or_else(|| self.table_not_exists(id).into())
    }

    async fn table_exists(&self, id: &CatalogIdentifier) -> Result<bool> {
        Ok(self.state.read().tables.contains_key(&id.full_name()))
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        if !state.databases.contains(database) {
            return Err(self.database_not_exists(database).into());
        }
        let prefix = format!("{database}.");
        Ok(state
            .tables
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }

    async fn add_partitions(&self, id: &CatalogIdentifier, specs: &[PartitionSpec]) -> Result<()> {
        let mut state = self.state.write();
        let key = id.full_name();
        if !state.tables.contains_key(&key) {
            return Err(self.table_not_exists(id).into());
        }
        let existing = state.partitions.entry(key).or_default();
        for spec in specs {
            if !existing.contains(spec) {
                existing.push(spec.clone());
            }
        }
        Ok(())
    }

    async fn drop_partition(&self, id: &CatalogIdentifier, spec: &PartitionSpec) -> Result<()> {
        let mut state = self.state.write();
        if let Some(existing) = state.partitions.get_mut(&id.full_name()) {
            existing.retain(|s| s != spec);
        }
        Ok(())
    }

    async fn list_partitions(&self, id: &CatalogIdentifier) -> Result<Vec<PartitionSpec>> {
        let state = self.state.read();
        let key = id.full_name();
        if !state.tables.contains_key(&key) {
            return Err(self.table_not_exists(id).into());
        }
        Ok(state.partitions.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableSchema};

    fn descriptor(db: &str, table: &str) -> TableDescriptor {
        TableDescriptor {
            identifier: CatalogIdentifier::new(db, table),
            schema: TableSchema::from_columns(vec![ColumnDef::new("id", "int")]),
            location: format!("memory://warehouse/{db}.db/{table}"),
            table_type: TableType::Managed,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_database_lifecycle() {
        let store = MemoryMetastore::new("my_catalog");
        store.create_database("test_db").await.unwrap();
        assert!(store.database_exists("test_db").await.unwrap());

        let err = store.create_database("test_db").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        store.drop_database("test_db", false).await.unwrap();
        assert!(!store.database_exists("test_db").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_missing_database_fails() {
        let store = MemoryMetastore::new("my_catalog");
        let err = store.drop_database("test_db2", false).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Catalog error: Database test_db2 does not exist in catalog my_catalog."
        );
    }

    #[tokio::test]
    async fn test_non_empty_database_needs_cascade() {
        let store = MemoryMetastore::new("my_catalog");
        store.create_database("db").await.unwrap();
        store.create_table(descriptor("db", "t")).await.unwrap();

        let err = store.drop_database("db", false).await.unwrap_err();
        assert!(err.to_string().contains("is not empty"));

        store.drop_database("db", true).await.unwrap();
        assert!(!store.database_exists("db").await.unwrap());
        assert!(!store
            .table_exists(&CatalogIdentifier::new("db", "t"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rename_moves_partitions_and_location() {
        let store = MemoryMetastore::new("my_catalog");
        store.create_database("db").await.unwrap();
        store.create_table(descriptor("db", "t1")).await.unwrap();
        let id = CatalogIdentifier::new("db", "t1");
        store
            .add_partitions(&id, &[PartitionSpec::single("dt", "2025-01-01")])
            .await
            .unwrap();

        let to = CatalogIdentifier::new("db", "t2");
        store.rename_table(&id, &to).await.unwrap();

        let renamed = store.get_table(&to).await.unwrap();
        assert!(renamed.location.ends_with("db.db/t2"));
        assert_eq!(store.list_partitions(&to).await.unwrap().len(), 1);
        assert!(!store.table_exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_partitions_is_idempotent() {
        let store = MemoryMetastore::new("my_catalog");
        store.create_database("db").await.unwrap();
        store.create_table(descriptor("db", "t")).await.unwrap();
        let id = CatalogIdentifier::new("db", "t");

        let spec = PartitionSpec::single("dt", "2025-01-01");
        store.add_partitions(&id, &[spec.clone()]).await.unwrap();
        store.add_partitions(&id, &[spec]).await.unwrap();
        assert_eq!(store.list_partitions(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = MemoryMetastore::new("my_catalog");
        store.create_database("zeta").await.unwrap();
        store.create_database("alpha").await.unwrap();
        assert_eq!(
            store.list_databases().await.unwrap(),
            vec!["alpha".to_string(), "zeta".to_string()]
        );

        store.create_table(descriptor("alpha", "b")).await.unwrap();
        store.create_table(descriptor("alpha", "a")).await.unwrap();
        assert_eq!(
            store.list_tables("alpha").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
