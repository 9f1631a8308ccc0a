//! Decode command implementation.

use anyhow::{Context, Result};
use lakesync_core::cdc::{decode_envelope, ChangeEvent, SchemaHistoryExtractor};
use std::path::Path;
use tracing::warn;

/// Decode every envelope in the file and print a per-event summary.
///
/// Lines that fail to decode are reported but do not stop the run; the
/// command fails only if no line decoded at all.
pub async fn run(file: &Path, database: Option<String>, table: Option<String>) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let extractor = match (&database, &table) {
        (Some(db), Some(t)) => SchemaHistoryExtractor::for_table(db.clone(), t.clone()),
        _ => SchemaHistoryExtractor::new(),
    };

    let mut decoded = 0usize;
    let mut failed = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let envelope = match decode_envelope(line.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping undecodable envelope");
                failed += 1;
                continue;
            }
        };

        let source = envelope.event.source();
        if let Some(db) = &database {
            if source.db != *db {
                continue;
            }
        }
        if let Some(t) = &table {
            if source.table != *t {
                continue;
            }
        }
        decoded += 1;

        match &envelope.event {
            ChangeEvent::DataChange { op, .. } => {
                println!(
                    "line {:>4}  {}  {}.{}",
                    line_no + 1,
                    op.as_str(),
                    source.db,
                    source.table
                );
            }
            ChangeEvent::SchemaChange { history_record, .. } => {
                println!(
                    "line {:>4}  schema-change  {}.{}",
                    line_no + 1,
                    source.db,
                    source.table
                );
                match extractor.extract(history_record) {
                    Ok(changes) => {
                        for change in changes {
                            println!("           - {change}");
                        }
                    }
                    Err(e) => {
                        warn!(line = line_no + 1, error = %e, "history record not decodable");
                        println!("           - <undecodable history record>");
                    }
                }
            }
        }
    }

    println!();
    println!("Decoded {decoded} events ({failed} undecodable lines)");

    if decoded == 0 && failed > 0 {
        anyhow::bail!("no change event could be decoded from {}", file.display());
    }
    Ok(())
}
