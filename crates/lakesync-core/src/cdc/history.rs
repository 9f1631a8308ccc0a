//! DDL-history record decoding.
//!
//! A schema-change event carries its DDL history as a nested JSON string. The
//! record lists table changes: `CREATE` entries carry a full column snapshot,
//! `ALTER` entries carry an explicit change list. Entries for other tables
//! than the one of interest are skipped, not errors.

use crate::error::CdcError;
use crate::schema::{ColumnPosition, TableChangeOp};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct RawHistoryRecord {
    #[serde(rename = "tableChanges", default)]
    table_changes: Vec<RawTableChange>,
}

#[derive(Deserialize)]
struct RawTableChange {
    #[serde(rename = "type")]
    change_type: Option<String>,
    id: Option<String>,
    table: Option<RawTableSnapshot>,
    #[serde(default)]
    changes: Vec<RawColumnChange>,
}

#[derive(Deserialize)]
struct RawTableSnapshot {
    #[serde(default)]
    columns: Vec<RawColumn>,
}

#[derive(Deserialize)]
struct RawColumn {
    name: Option<String>,
    #[serde(rename = "typeName")]
    type_name: Option<String>,
    #[serde(default = "default_optional")]
    optional: bool,
    comment: Option<String>,
}

fn default_optional() -> bool {
    true
}

#[derive(Deserialize)]
struct RawColumnChange {
    kind: Option<String>,
    column: Option<RawColumn>,
    name: Option<String>,
    #[serde(rename = "oldName")]
    old_name: Option<String>,
    #[serde(rename = "newName")]
    new_name: Option<String>,
    #[serde(rename = "newType")]
    new_type: Option<String>,
    comment: Option<String>,
    #[serde(default)]
    first: bool,
    after: Option<String>,
}

/// Decodes serialized DDL-history records into ordered table changes.
#[derive(Debug, Clone, Default)]
pub struct SchemaHistoryExtractor {
    database: Option<String>,
    table: Option<String>,
}

impl SchemaHistoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only yield changes for the given source table; entries for other
    /// tables are skipped.
    pub fn for_table(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            table: Some(table.into()),
        }
    }

    /// Decode a history record into the ordered table changes it carries.
    ///
    /// A `CREATE` entry yields one add-column change per column, in snapshot
    /// order. An `ALTER` entry yields its explicit change list; an `ALTER`
    /// without one is skipped. Malformed serialization fails the whole record.
    pub fn extract(&self, history_record: &str) -> Result<Vec<TableChangeOp>, CdcError> {
        let record: RawHistoryRecord = serde_json::from_str(history_record)
            .map_err(|e| CdcError::history(format!("invalid history JSON: {e}")))?;

        let mut ops = Vec::new();
        for entry in record.table_changes {
            if !self.matches(entry.id.as_deref()) {
                debug!(id = ?entry.id, "skipping history entry for unrelated table");
                continue;
            }

            let change_type = entry
                .change_type
                .as_deref()
                .ok_or_else(|| CdcError::history("table change entry has no type"))?;

            match change_type {
                "CREATE" => {
                    let snapshot = entry
                        .table
                        .ok_or_else(|| CdcError::history("CREATE entry has no table snapshot"))?;
                    for column in snapshot.columns {
                        ops.push(TableChangeOp::AddColumn {
                            name: required(column.name, "column name")?,
                            field_type: required(column.type_name, "column typeName")?,
                            nullable: column.optional,
                            comment: column.comment,
                            position: None,
                        });
                    }
                }
                "ALTER" => {
                    if entry.changes.is_empty() {
                        debug!(id = ?entry.id, "ALTER entry without explicit changes, skipping");
                        continue;
                    }
                    for change in entry.changes {
                        ops.push(decode_column_change(change)?);
                    }
                }
                // table-level drops are handled by the synchronizer, not here
                "DROP" => {}
                other => {
                    return Err(CdcError::history(format!(
                        "unknown table change type [{other}]"
                    )));
                }
            }
        }
        Ok(ops)
    }

    fn matches(&self, id: Option<&str>) -> bool {
        let (Some(want_db), Some(want_table)) = (&self.database, &self.table) else {
            return true;
        };
        let Some(id) = id else {
            return false;
        };
        match parse_table_id(id) {
            Some((db, table)) => db == *want_db && table == *want_table,
            None => false,
        }
    }
}

/// Parse a history table id such as `"db"."table"` or `db.table`.
fn parse_table_id(id: &str) -> Option<(String, String)> {
    let cleaned: String = id.chars().filter(|c| *c != '"' && *c != '`').collect();
    let (db, table) = cleaned.split_once('.')?;
    if db.is_empty() || table.is_empty() {
        return None;
    }
    Some((db.to_string(), table.to_string()))
}

fn decode_column_change(change: RawColumnChange) -> Result<TableChangeOp, CdcError> {
    let kind = change
        .kind
        .as_deref()
        .ok_or_else(|| CdcError::history("column change has no kind"))?;

    let position = if change.first {
        Some(ColumnPosition::First)
    } else {
        change.after.clone().map(ColumnPosition::After)
    };

    match kind {
        "addColumn" => {
            let column = change
                .column
                .ok_or_else(|| CdcError::history("addColumn change has no column"))?;
            Ok(TableChangeOp::AddColumn {
                name: required(column.name, "column name")?,
                field_type: required(column.type_name, "column typeName")?,
                nullable: column.optional,
                comment: column.comment,
                position,
            })
        }
        "dropColumn" => Ok(TableChangeOp::DropColumn {
            name: required(change.name, "dropColumn name")?,
        }),
        "renameColumn" => Ok(TableChangeOp::RenameColumn {
            old_name: required(change.old_name, "renameColumn oldName")?,
            new_name: required(change.new_name, "renameColumn newName")?,
        }),
        "updateColumnType" => Ok(TableChangeOp::ChangeColumnType {
            name: required(change.name, "updateColumnType name")?,
            new_type: required(change.new_type, "updateColumnType newType")?,
        }),
        "updateColumnPosition" => Ok(TableChangeOp::ReorderColumn {
            name: required(change.name, "updateColumnPosition name")?,
            position: position
                .ok_or_else(|| CdcError::history("updateColumnPosition has no position"))?,
        }),
        "updateColumnComment" => Ok(TableChangeOp::ChangeColumnComment {
            name: required(change.name, "updateColumnComment name")?,
            comment: change.comment,
        }),
        other => Err(CdcError::history(format!(
            "unknown column change kind [{other}]"
        ))),
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, CdcError> {
    value.ok_or_else(|| CdcError::history(format!("missing {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_entry_yields_add_columns_in_order() {
        let record = r#"{
            "databaseName": "test_db",
            "ddl": "CREATE TABLE t (id INT NOT NULL, name VARCHAR(64))",
            "tableChanges": [{
                "type": "CREATE",
                "id": "\"test_db\".\"t\"",
                "table": {
                    "columns": [
                        {"name": "id", "typeName": "INT", "optional": false},
                        {"name": "name", "typeName": "VARCHAR(64)", "optional": true, "comment": "display"}
                    ]
                }
            }]
        }"#;

        let ops = SchemaHistoryExtractor::new().extract(record).unwrap();
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            TableChangeOp::AddColumn {
                name,
                field_type,
                nullable,
                ..
            } => {
                assert_eq!(name, "id");
                assert_eq!(field_type, "INT");
                assert!(!nullable);
            }
            other => panic!("unexpected op {other}"),
        }
        match &ops[1] {
            TableChangeOp::AddColumn { name, comment, .. } => {
                assert_eq!(name, "name");
                assert_eq!(comment.as_deref(), Some("display"));
            }
            other => panic!("unexpected op {other}"),
        }
    }

    #[test]
    fn test_alter_entry_with_explicit_changes() {
        let record = r#"{
            "tableChanges": [{
                "type": "ALTER",
                "id": "db.t",
                "changes": [
                    {"kind": "addColumn", "column": {"name": "score", "typeName": "DOUBLE"}, "after": "id"},
                    {"kind": "renameColumn", "oldName": "name", "newName": "full_name"},
                    {"kind": "updateColumnType", "name": "id", "newType": "BIGINT"},
                    {"kind": "dropColumn", "name": "obsolete"}
                ]
            }]
        }"#;

        let ops = SchemaHistoryExtractor::new().extract(record).unwrap();
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            &ops[0],
            TableChangeOp::AddColumn { position: Some(ColumnPosition::After(a)), .. } if a == "id"
        ));
        assert!(matches!(&ops[1], TableChangeOp::RenameColumn { .. }));
        assert!(matches!(&ops[2], TableChangeOp::ChangeColumnType { .. }));
        assert!(matches!(&ops[3], TableChangeOp::DropColumn { .. }));
    }

    #[test]
    fn test_unrelated_tables_are_skipped() {
        let record = r#"{
            "tableChanges": [
                {"type": "ALTER", "id": "other_db.other_t",
                 "changes": [{"kind": "dropColumn", "name": "x"}]},
                {"type": "ALTER", "id": "test_db.t",
                 "changes": [{"kind": "dropColumn", "name": "y"}]}
            ]
        }"#;

        let ops = SchemaHistoryExtractor::for_table("test_db", "t")
            .extract(record)
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], TableChangeOp::DropColumn { name } if name == "y"));
    }

    #[test]
    fn test_alter_without_changes_is_skipped() {
        let record = r#"{"tableChanges": [{"type": "ALTER", "id": "db.t"}]}"#;
        let ops = SchemaHistoryExtractor::new().extract(record).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_empty_record_yields_no_ops() {
        let ops = SchemaHistoryExtractor::new().extract("{}").unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_malformed_record_rejected() {
        let err = SchemaHistoryExtractor::new()
            .extract("not json at all")
            .unwrap_err();
        assert!(matches!(err, CdcError::HistoryDecode { .. }));
    }

    #[test]
    fn test_unknown_change_kind_rejected() {
        let record = r#"{
            "tableChanges": [{"type": "ALTER", "id": "db.t",
                "changes": [{"kind": "teleportColumn", "name": "x"}]}]
        }"#;
        let err = SchemaHistoryExtractor::new().extract(record).unwrap_err();
        assert!(err.to_string().contains("teleportColumn"));
    }

    #[test]
    fn test_table_id_parsing() {
        assert_eq!(
            parse_table_id("\"db\".\"t\""),
            Some(("db".to_string(), "t".to_string()))
        );
        assert_eq!(
            parse_table_id("`db`.`t`"),
            Some(("db".to_string(), "t".to_string()))
        );
        assert_eq!(parse_table_id("no_dot"), None);
    }
}
