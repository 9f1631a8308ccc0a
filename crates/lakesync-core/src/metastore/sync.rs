//! Metastore synchronizer.
//!
//! Front door for all catalog mutations. Each operation validates
//! identifiers, takes the advisory lock on the affected resource, applies the
//! change to the metastore, and keeps the schema files in the warehouse in
//! step with the metastore record.

use crate::config::{CatalogConfig, TableType};
use crate::error::{CatalogError, Error, Result};
use crate::lock::DistributedLock;
use crate::metastore::client::{CatalogIdentifier, MetastoreClient, TableDescriptor};
use crate::metastore::ident::{
    validate_database_name, validate_field_names, validate_table_name,
};
use crate::partition::PartitionSpec;
use crate::schema::{apply_table_changes, ColumnDef, TableChangeOp, TableSchema};
use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-table override of the catalog-level table type.
pub const OPT_TABLE_TYPE: &str = "table.type";
/// Mirror data partitions into the metastore.
pub const OPT_METASTORE_PARTITIONED: &str = "metastore.partitioned-table";
/// Expose tags as partitions of the named column.
pub const OPT_TAG_TO_PARTITION: &str = "metastore.tag-to-partition";
/// Preview mode for tag partitions; only `process-time` is supported.
pub const OPT_TAG_TO_PARTITION_PREVIEW: &str = "metastore.tag-to-partition.preview";
/// Partition keys declared as a table option instead of on the DDL.
pub const OPT_PARTITION_KEYS: &str = "partition";
/// Primary keys declared as a table option instead of on the DDL.
pub const OPT_PRIMARY_KEYS: &str = "primary-key";

const PREVIEW_PROCESS_TIME: &str = "process-time";

/// Table declaration handed to [`MetastoreSynchronizer::create_table`].
#[derive(Debug, Clone, Default)]
pub struct TableSpec {
    pub columns: Vec<ColumnDef>,
    pub partition_keys: Vec<String>,
    pub primary_keys: Vec<String>,
    pub options: HashMap<String, String>,
    pub comment: Option<String>,
}

impl TableSpec {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    pub fn partitioned_by(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.partition_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary_key(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A committed snapshot, as reported by the table's commit protocol.
#[derive(Debug, Clone)]
pub struct CommitSnapshot {
    pub snapshot_id: i64,
    /// Partitions the snapshot wrote into, empty for unpartitioned tables
    pub added_partitions: Vec<PartitionSpec>,
}

/// Synchronizes catalog state into an external metastore.
pub struct MetastoreSynchronizer {
    client: Arc<dyn MetastoreClient>,
    storage: Arc<dyn ObjectStore>,
    lock: DistributedLock,
    config: CatalogConfig,
    /// Provisional tag partitions by (table, snapshot), replaced when the
    /// real tag lands. Only the latest snapshot per table is tracked;
    /// tracking is in-process, so after a restart a provisional partition
    /// from an earlier run is not dropped when its tag lands.
    preview_partitions: Mutex<HashMap<(String, i64), String>>,
}

impl MetastoreSynchronizer {
    pub fn new(
        client: Arc<dyn MetastoreClient>,
        storage: Arc<dyn ObjectStore>,
        lock: DistributedLock,
        config: CatalogConfig,
    ) -> Self {
        Self {
            client,
            storage,
            lock,
            config,
            preview_partitions: Mutex::new(HashMap::new()),
        }
    }

    fn catalog_name(&self) -> &str {
        &self.config.name
    }

    #[cfg(test)]
    fn preview_backlog(&self) -> usize {
        self.preview_partitions.lock().len()
    }

    /// Full storage location URI for a table.
    pub fn table_location(&self, id: &CatalogIdentifier) -> String {
        format!(
            "{}/{}.db/{}",
            self.config.warehouse.trim_end_matches('/'),
            id.database,
            id.table
        )
    }

    fn table_path(&self, id: &CatalogIdentifier) -> StorePath {
        StorePath::from(format!("{}.db/{}", id.database, id.table))
    }

    fn schema_file_path(&self, id: &CatalogIdentifier, schema_id: i64) -> StorePath {
        StorePath::from(format!(
            "{}.db/{}/schema/schema-{}",
            id.database, id.table, schema_id
        ))
    }

    async fn write_schema_file(&self, id: &CatalogIdentifier, schema: &TableSchema) -> Result<()> {
        let path = self.schema_file_path(id, schema.schema_id);
        let payload = serde_json::to_vec_pretty(schema)?;
        self.storage.put(&path, payload.into()).await?;
        Ok(())
    }

    /// Delete every object under the table's storage prefix.
    async fn remove_storage(&self, id: &CatalogIdentifier) -> Result<()> {
        let prefix = self.table_path(id);
        let mut listing = self.storage.list(Some(&prefix));
        while let Some(meta) = listing.try_next().await? {
            self.storage.delete(&meta.location).await?;
        }
        debug!(table = %id, "removed table storage");
        Ok(())
    }

    pub async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<()> {
        validate_database_name(name)?;
        self.lock
            .run_with_lock(name, || async {
                if self.client.database_exists(name).await? {
                    if if_not_exists {
                        return Ok(());
                    }
                    return Err(CatalogError::DatabaseAlreadyExists {
                        database: name.to_string(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }
                self.client.create_database(name).await?;
                info!(database = name, "created database");
                Ok(())
            })
            .await
    }

    /// Drop a database. A non-empty database needs `cascade`; with `cascade`
    /// the storage locations of its managed tables are removed as well.
    pub async fn drop_database(&self, name: &str, if_exists: bool, cascade: bool) -> Result<()> {
        validate_database_name(name)?;
        self.lock
            .run_with_lock(name, || async {
                if !self.client.database_exists(name).await? {
                    if if_exists {
                        return Ok(());
                    }
                    return Err(CatalogError::DatabaseNotExists {
                        database: name.to_string(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }

                let tables = self.client.list_tables(name).await?;
                if !tables.is_empty() && !cascade {
                    return Err(CatalogError::DatabaseNotEmpty {
                        database: name.to_string(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }

                let mut managed = Vec::new();
                for table in &tables {
                    let id = CatalogIdentifier::new(name, table.clone());
                    let descriptor = self.client.get_table(&id).await?;
                    if descriptor.table_type == TableType::Managed {
                        managed.push(id);
                    }
                }

                self.client.drop_database(name, cascade).await?;
                for id in managed {
                    self.remove_storage(&id).await?;
                }
                info!(database = name, cascade, "dropped database");
                Ok(())
            })
            .await
    }

    /// Make sure the configured default database exists. Called once at
    /// startup; harmless when another synchronizer got there first.
    pub async fn ensure_default_database(&self) -> Result<()> {
        self.create_database(&self.config.default_database, true)
            .await
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.client.list_databases().await
    }

    pub async fn create_table(
        &self,
        id: &CatalogIdentifier,
        spec: TableSpec,
        if_not_exists: bool,
    ) -> Result<()> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        validate_field_names(spec.columns.iter().map(|c| c.name.as_str()))?;

        let (schema, table_type) = self.resolve_table_spec(spec)?;

        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                if !self.client.database_exists(&id.database).await? {
                    return Err(CatalogError::DatabaseNotExists {
                        database: id.database.clone(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }
                if self.client.table_exists(id).await? {
                    if if_not_exists {
                        return Ok(());
                    }
                    return Err(CatalogError::TableAlreadyExists {
                        identifier: id.full_name(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }

                let descriptor = TableDescriptor {
                    identifier: id.clone(),
                    schema: schema.clone(),
                    location: self.table_location(id),
                    table_type,
                    created_at: Utc::now(),
                };
                self.client.create_table(descriptor).await?;
                self.write_schema_file(id, &schema).await?;
                info!(table = %id, ?table_type, "created table");
                Ok(())
            })
            .await
    }

    /// Resolve a declaration into the initial schema: fold the option-side
    /// partition / primary-key declarations in, inherit catalog defaults, and
    /// pick the table type.
    fn resolve_table_spec(&self, spec: TableSpec) -> Result<(TableSchema, TableType)> {
        let mut options = spec.options;

        let partition_keys = resolve_key_clause(
            spec.partition_keys,
            options.remove(OPT_PARTITION_KEYS),
            "partition",
        )?;
        let primary_keys = resolve_key_clause(
            spec.primary_keys,
            options.remove(OPT_PRIMARY_KEYS),
            "primary key",
        )?;

        let column_names: Vec<&str> = spec.columns.iter().map(|c| c.name.as_str()).collect();
        check_keys_in_columns(&column_names, &partition_keys, "partition fields")?;
        check_keys_in_columns(&column_names, &primary_keys, "primary key constraint")?;

        // catalog-level defaults first, the table's own options win
        let mut merged = self.config.table_default_options();
        merged.extend(options);

        let table_type = match merged.get(OPT_TABLE_TYPE) {
            Some(value) => TableType::parse_option(value).ok_or_else(|| {
                Error::Config(format!("Unknown {OPT_TABLE_TYPE} value [{value}]"))
            })?,
            None => self.config.table_type,
        };

        let mut schema = TableSchema::from_columns(spec.columns)
            .with_partition_keys(partition_keys)
            .with_primary_keys(primary_keys)
            .with_options(merged);
        if let Some(comment) = spec.comment {
            schema = schema.with_comment(comment);
        }
        Ok((schema, table_type))
    }

    /// Drop a table. A managed table's storage location is removed; an
    /// external table's data stays in place.
    pub async fn drop_table(&self, id: &CatalogIdentifier, if_exists: bool) -> Result<()> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                if !self.client.table_exists(id).await? {
                    if if_exists {
                        return Ok(());
                    }
                    return Err(CatalogError::TableNotExists {
                        identifier: id.full_name(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }
                let descriptor = self.client.get_table(id).await?;
                self.client.drop_table(id).await?;
                if descriptor.table_type == TableType::Managed {
                    self.remove_storage(id).await?;
                }
                info!(table = %id, "dropped table");
                Ok(())
            })
            .await
    }

    pub async fn rename_table(&self, from: &CatalogIdentifier, to_table: &str) -> Result<()> {
        validate_database_name(&from.database)?;
        validate_table_name(&from.table)?;
        validate_table_name(to_table)?;
        let to = CatalogIdentifier::new(from.database.clone(), to_table);
        let key = from.full_name();
        self.lock
            .run_with_lock(&key, || async {
                if !self.client.table_exists(from).await? {
                    return Err(CatalogError::TableNotExists {
                        identifier: from.full_name(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }
                if self.client.table_exists(&to).await? {
                    return Err(CatalogError::RenameTargetExists {
                        from: from.full_name(),
                        to: to.full_name(),
                        catalog: self.catalog_name().to_string(),
                    }
                    .into());
                }
                self.client.rename_table(from, &to).await?;
                info!(from = %from, to = %to, "renamed table");
                Ok(())
            })
            .await
    }

    /// Apply an ordered change batch to a table's schema and mirror the new
    /// schema version into the metastore.
    pub async fn alter_table(
        &self,
        id: &CatalogIdentifier,
        changes: &[TableChangeOp],
    ) -> Result<TableSchema> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        validate_field_names(changes.iter().filter_map(new_column_name))?;
        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                let descriptor = self.client.get_table(id).await?;
                let schema = apply_table_changes(&descriptor.schema, changes)?;
                self.client.alter_table_schema(id, schema.clone()).await?;
                self.write_schema_file(id, &schema).await?;
                info!(table = %id, schema_id = schema.schema_id, "altered table schema");
                Ok(schema)
            })
            .await
    }

    /// Merge options into a table's schema, bumping the schema version.
    pub async fn alter_table_options(
        &self,
        id: &CatalogIdentifier,
        set: HashMap<String, String>,
    ) -> Result<TableSchema> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                let descriptor = self.client.get_table(id).await?;
                let mut schema = descriptor.schema;
                schema.options.extend(set.clone());
                schema.schema_id += 1;
                self.client.alter_table_schema(id, schema.clone()).await?;
                self.write_schema_file(id, &schema).await?;
                Ok(schema)
            })
            .await
    }

    pub async fn get_table(&self, id: &CatalogIdentifier) -> Result<TableDescriptor> {
        self.client.get_table(id).await
    }

    pub async fn table_exists(&self, id: &CatalogIdentifier) -> Result<bool> {
        self.client.table_exists(id).await
    }

    /// Tables in a database whose storage still holds a schema file. A table
    /// whose warehouse directory was removed out-of-band is hidden rather
    /// than surfaced as a broken entry.
    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for table in self.client.list_tables(database).await? {
            let id = CatalogIdentifier::new(database, table.clone());
            let descriptor = self.client.get_table(&id).await?;
            let path = self.schema_file_path(&id, descriptor.schema.schema_id);
            match self.storage.head(&path).await {
                Ok(_) => out.push(table),
                Err(object_store::Error::NotFound { .. }) => {
                    debug!(table = %id, "schema file missing, hiding table");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    /// Mirror the partitions a committed snapshot wrote into the metastore.
    /// Returns the number of partitions actually added.
    ///
    /// No-op unless the table opts in via `metastore.partitioned-table` or
    /// tag-to-partition preview. Already-registered partitions are skipped,
    /// so replaying a snapshot or racing another synchronizer is harmless.
    pub async fn sync_partitions(
        &self,
        id: &CatalogIdentifier,
        commit: &CommitSnapshot,
    ) -> Result<usize> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                let descriptor = self.client.get_table(id).await?;
                let options = &descriptor.schema.options;

                let mut to_add: Vec<PartitionSpec> = Vec::new();

                let mirror_partitions = options
                    .get(OPT_METASTORE_PARTITIONED)
                    .is_some_and(|v| v.as_str() == "true")
                    && !descriptor.schema.partition_keys.is_empty();
                if mirror_partitions {
                    to_add.extend(commit.added_partitions.iter().cloned());
                }

                if let (Some(tag_column), Some(preview)) = (
                    options.get(OPT_TAG_TO_PARTITION),
                    options.get(OPT_TAG_TO_PARTITION_PREVIEW),
                ) {
                    if preview == PREVIEW_PROCESS_TIME {
                        let value = Utc::now().format("%Y-%m-%d %H:%M").to_string();
                        to_add.push(PartitionSpec::single(tag_column.clone(), value.clone()));
                        let mut preview = self.preview_partitions.lock();
                        // earlier untagged snapshots are superseded by this one
                        preview.retain(|(table, _), _| table != &key);
                        preview.insert((key.clone(), commit.snapshot_id), value);
                    }
                }

                if to_add.is_empty() {
                    return Ok(0);
                }

                let existing = self.client.list_partitions(id).await?;
                let mut unique: Vec<PartitionSpec> = Vec::new();
                for spec in to_add {
                    if !existing.contains(&spec) && !unique.contains(&spec) {
                        unique.push(spec);
                    }
                }
                if !unique.is_empty() {
                    self.client.add_partitions(id, &unique).await?;
                    debug!(table = %id, added = unique.len(), "synchronized partitions");
                }
                Ok(unique.len())
            })
            .await
    }

    /// Register a tag as a metastore partition of the tag-to-partition
    /// column. A provisional preview partition recorded for the same snapshot
    /// is replaced, so each logical tag point ends up with one entry.
    pub async fn create_tag(
        &self,
        id: &CatalogIdentifier,
        tag_name: &str,
        snapshot_id: i64,
    ) -> Result<()> {
        validate_database_name(&id.database)?;
        validate_table_name(&id.table)?;
        let key = id.full_name();
        self.lock
            .run_with_lock(&key, || async {
                let descriptor = self.client.get_table(id).await?;
                let Some(tag_column) = descriptor.schema.options.get(OPT_TAG_TO_PARTITION) else {
                    debug!(table = %id, tag = tag_name, "tag-to-partition not enabled, skipping");
                    return Ok(());
                };

                let provisional = self
                    .preview_partitions
                    .lock()
                    .remove(&(key.clone(), snapshot_id));
                if let Some(value) = provisional {
                    if value != tag_name {
                        self.client
                            .drop_partition(id, &PartitionSpec::single(tag_column.clone(), value))
                            .await?;
                    }
                }

                let spec = PartitionSpec::single(tag_column.clone(), tag_name);
                let existing = self.client.list_partitions(id).await?;
                if !existing.contains(&spec) {
                    self.client.add_partitions(id, &[spec]).await?;
                }
                info!(table = %id, tag = tag_name, snapshot_id, "registered tag partition");
                Ok(())
            })
            .await
    }
}

/// New column names introduced by a change, which must be valid identifiers.
fn new_column_name(change: &TableChangeOp) -> Option<&str> {
    match change {
        TableChangeOp::AddColumn { name, .. } => Some(name),
        TableChangeOp::RenameColumn { new_name, .. } => Some(new_name),
        _ => None,
    }
}

/// Fold a DDL-side key list and an option-side `a,b,c` declaration into one.
/// Declaring both is an error.
fn resolve_key_clause(
    ddl_keys: Vec<String>,
    option_value: Option<String>,
    clause: &'static str,
) -> Result<Vec<String>> {
    match option_value {
        None => Ok(ddl_keys),
        Some(_) if !ddl_keys.is_empty() => {
            Err(CatalogError::ConflictingOptions { clause }.into())
        }
        Some(value) => Ok(value
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()),
    }
}

fn check_keys_in_columns(
    columns: &[&str],
    keys: &[String],
    constraint: &'static str,
) -> Result<()> {
    let missing: Vec<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|k| !columns.contains(k))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(CatalogError::KeysNotInColumns {
        columns: columns.join(", "),
        constraint,
        keys: missing.join(", "),
    }
    .into())
}
