//! Applies ordered table-change batches to a schema.

use crate::error::SchemaError;
use crate::schema::types::{ColumnPosition, SchemaField, TableChangeOp, TableSchema};
use tracing::debug;

/// Apply an ordered batch of changes, producing the next schema version.
///
/// The batch is atomic: if any change conflicts with the schema state left by
/// the preceding changes, the whole batch is rejected and the input schema is
/// untouched. Dropped field ids are never reused; re-adding a column under a
/// previously dropped name assigns a fresh id.
pub fn apply_table_changes(
    schema: &TableSchema,
    changes: &[TableChangeOp],
) -> Result<TableSchema, SchemaError> {
    let mut next = schema.clone();

    for change in changes {
        apply_one(&mut next, change)?;
    }

    next.schema_id = schema.schema_id + 1;
    debug!(
        from = schema.schema_id,
        to = next.schema_id,
        changes = changes.len(),
        "applied schema change batch"
    );
    Ok(next)
}

fn apply_one(schema: &mut TableSchema, change: &TableChangeOp) -> Result<(), SchemaError> {
    match change {
        TableChangeOp::AddColumn {
            name,
            field_type,
            nullable,
            comment,
            position,
        } => {
            if schema.has_field(name) {
                return Err(conflict(change, format!("column [{name}] already exists")));
            }
            let field = SchemaField {
                id: schema.next_field_id,
                name: name.clone(),
                field_type: field_type.clone(),
                nullable: *nullable,
                comment: comment.clone(),
            };
            let index = match position {
                None => schema.fields.len(),
                Some(pos) => resolve_position(schema, change, pos)?,
            };
            schema.fields.insert(index, field);
            schema.next_field_id += 1;
        }

        TableChangeOp::DropColumn { name } => {
            let index = require_field(schema, change, name)?;
            if schema.partition_keys.iter().any(|k| k == name) {
                return Err(conflict(
                    change,
                    format!("column [{name}] is a partition key"),
                ));
            }
            if schema.primary_keys.iter().any(|k| k == name) {
                return Err(conflict(
                    change,
                    format!("column [{name}] is a primary key"),
                ));
            }
            schema.fields.remove(index);
        }

        TableChangeOp::RenameColumn { old_name, new_name } => {
            let index = require_field(schema, change, old_name)?;
            if schema.has_field(new_name) {
                return Err(conflict(
                    change,
                    format!("column [{new_name}] already exists"),
                ));
            }
            schema.fields[index].name = new_name.clone();
            for key in schema
                .partition_keys
                .iter_mut()
                .chain(schema.primary_keys.iter_mut())
            {
                if key == old_name {
                    *key = new_name.clone();
                }
            }
        }

        TableChangeOp::ChangeColumnType { name, new_type } => {
            let index = require_field(schema, change, name)?;
            schema.fields[index].field_type = new_type.clone();
        }

        TableChangeOp::ReorderColumn { name, position } => {
            let index = require_field(schema, change, name)?;
            let field = schema.fields.remove(index);
            let target = resolve_position(schema, change, position)?;
            schema.fields.insert(target, field);
        }

        TableChangeOp::ChangeColumnComment { name, comment } => {
            let index = require_field(schema, change, name)?;
            schema.fields[index].comment = comment.clone();
        }
    }
    Ok(())
}

fn require_field(
    schema: &TableSchema,
    change: &TableChangeOp,
    name: &str,
) -> Result<usize, SchemaError> {
    schema
        .field_index(name)
        .ok_or_else(|| conflict(change, format!("column [{name}] does not exist")))
}

fn resolve_position(
    schema: &TableSchema,
    change: &TableChangeOp,
    position: &ColumnPosition,
) -> Result<usize, SchemaError> {
    match position {
        ColumnPosition::First => Ok(0),
        ColumnPosition::After(anchor) => schema
            .field_index(anchor)
            .map(|i| i + 1)
            .ok_or_else(|| conflict(change, format!("anchor column [{anchor}] does not exist"))),
    }
}

fn conflict(change: &TableChangeOp, reason: String) -> SchemaError {
    SchemaError::Conflict {
        operation: change.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::ColumnDef;

    fn base_schema() -> TableSchema {
        TableSchema::from_columns(vec![
            ColumnDef::new("id", "int").not_null(),
            ColumnDef::new("name", "string"),
            ColumnDef::new("dt", "string"),
        ])
        .with_partition_keys(vec!["dt".to_string()])
    }

    #[test]
    fn test_add_column_appends_with_next_id() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[TableChangeOp::AddColumn {
                name: "score".to_string(),
                field_type: "double".to_string(),
                nullable: true,
                comment: None,
                position: None,
            }],
        )
        .unwrap();

        assert_eq!(next.schema_id, 1);
        let added = next.field("score").unwrap();
        assert_eq!(added.id, 3);
        assert_eq!(next.next_field_id(), 4);
        assert_eq!(next.field_names(), vec!["id", "name", "dt", "score"]);
    }

    #[test]
    fn test_add_column_with_position() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[TableChangeOp::AddColumn {
                name: "uid".to_string(),
                field_type: "bigint".to_string(),
                nullable: false,
                comment: None,
                position: Some(ColumnPosition::After("id".to_string())),
            }],
        )
        .unwrap();
        assert_eq!(next.field_names(), vec!["id", "uid", "name", "dt"]);
    }

    #[test]
    fn test_add_existing_column_rejected() {
        let schema = base_schema();
        let err = apply_table_changes(
            &schema,
            &[TableChangeOp::AddColumn {
                name: "name".to_string(),
                field_type: "string".to_string(),
                nullable: true,
                comment: None,
                position: None,
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_drop_then_readd_gets_fresh_id() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[
                TableChangeOp::DropColumn {
                    name: "name".to_string(),
                },
                TableChangeOp::AddColumn {
                    name: "name".to_string(),
                    field_type: "string".to_string(),
                    nullable: true,
                    comment: None,
                    position: None,
                },
            ],
        )
        .unwrap();
        // id 1 was burned by the drop; the re-added column gets a fresh id
        assert_eq!(next.field("name").unwrap().id, 3);
        assert_eq!(next.next_field_id(), 4);
    }

    #[test]
    fn test_drop_partition_key_rejected() {
        let schema = base_schema();
        let err = apply_table_changes(
            &schema,
            &[TableChangeOp::DropColumn {
                name: "dt".to_string(),
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("partition key"));
    }

    #[test]
    fn test_rename_keeps_field_id_and_updates_keys() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[TableChangeOp::RenameColumn {
                old_name: "dt".to_string(),
                new_name: "day".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(next.field("day").unwrap().id, 2);
        assert_eq!(next.partition_keys, vec!["day".to_string()]);
        assert!(!next.has_field("dt"));
    }

    #[test]
    fn test_rename_to_existing_rejected() {
        let schema = base_schema();
        let err = apply_table_changes(
            &schema,
            &[TableChangeOp::RenameColumn {
                old_name: "name".to_string(),
                new_name: "id".to_string(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict { .. }));
    }

    #[test]
    fn test_reorder_first() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[TableChangeOp::ReorderColumn {
                name: "dt".to_string(),
                position: ColumnPosition::First,
            }],
        )
        .unwrap();
        assert_eq!(next.field_names(), vec!["dt", "id", "name"]);
    }

    #[test]
    fn test_missing_anchor_rejected() {
        let schema = base_schema();
        let err = apply_table_changes(
            &schema,
            &[TableChangeOp::ReorderColumn {
                name: "dt".to_string(),
                position: ColumnPosition::After("missing".to_string()),
            }],
        )
        .unwrap_err();
        assert!(err.to_string().contains("anchor column [missing]"));
    }

    #[test]
    fn test_batch_is_atomic() {
        let schema = base_schema();
        let result = apply_table_changes(
            &schema,
            &[
                TableChangeOp::AddColumn {
                    name: "ok".to_string(),
                    field_type: "int".to_string(),
                    nullable: true,
                    comment: None,
                    position: None,
                },
                TableChangeOp::DropColumn {
                    name: "missing".to_string(),
                },
            ],
        );
        assert!(result.is_err());
        // the input schema is untouched by the failed batch
        assert!(!schema.has_field("ok"));
        assert_eq!(schema.schema_id, 0);
    }

    #[test]
    fn test_each_change_sees_preceding_changes() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[
                TableChangeOp::AddColumn {
                    name: "tmp".to_string(),
                    field_type: "int".to_string(),
                    nullable: true,
                    comment: None,
                    position: None,
                },
                TableChangeOp::RenameColumn {
                    old_name: "tmp".to_string(),
                    new_name: "kept".to_string(),
                },
            ],
        )
        .unwrap();
        assert!(next.has_field("kept"));
        assert_eq!(next.schema_id, 1);
    }

    #[test]
    fn test_change_type_and_comment() {
        let schema = base_schema();
        let next = apply_table_changes(
            &schema,
            &[
                TableChangeOp::ChangeColumnType {
                    name: "name".to_string(),
                    new_type: "varchar(64)".to_string(),
                },
                TableChangeOp::ChangeColumnComment {
                    name: "name".to_string(),
                    comment: Some("display name".to_string()),
                },
            ],
        )
        .unwrap();
        let field = next.field("name").unwrap();
        assert_eq!(field.field_type, "varchar(64)");
        assert_eq!(field.comment.as_deref(), Some("display name"));
        assert_eq!(field.id, 1);
    }
}
