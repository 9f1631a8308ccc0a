//! Replay command implementation.

use anyhow::{Context, Result};
use lakesync_core::cdc::SchemaHistoryExtractor;
use lakesync_core::schema::{apply_table_changes, TableSchema};
use std::path::Path;
use tracing::info;

/// Apply a serialized history record to a schema file and print the result.
pub async fn run(
    schema_path: &Path,
    history_path: &Path,
    database: Option<String>,
    table: Option<String>,
) -> Result<()> {
    let schema_json = tokio::fs::read_to_string(schema_path)
        .await
        .with_context(|| format!("reading {}", schema_path.display()))?;
    let schema: TableSchema =
        serde_json::from_str(&schema_json).context("parsing table schema")?;

    let history_record = tokio::fs::read_to_string(history_path)
        .await
        .with_context(|| format!("reading {}", history_path.display()))?;

    let extractor = match (database, table) {
        (Some(db), Some(t)) => SchemaHistoryExtractor::for_table(db, t),
        _ => SchemaHistoryExtractor::new(),
    };
    let changes = extractor.extract(history_record.trim())?;

    if changes.is_empty() {
        println!("History record carries no applicable changes");
        return Ok(());
    }

    println!("Applying {} changes:", changes.len());
    for change in &changes {
        println!("  - {change}");
    }

    let next = apply_table_changes(&schema, &changes)?;
    info!(
        from = schema.schema_id,
        to = next.schema_id,
        "schema replay complete"
    );

    println!();
    println!("{}", serde_json::to_string_pretty(&next)?);
    Ok(())
}
