//! Table schema model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single field in a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Stable field id; never reused after a drop
    pub id: i32,
    pub name: String,
    pub field_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Column declaration used when creating a table, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            nullable: true,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Versioned table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema version, incremented by every applied change batch
    pub schema_id: i64,
    pub fields: Vec<SchemaField>,
    /// Partition column names, in declaration order
    #[serde(default)]
    pub partition_keys: Vec<String>,
    /// Primary key column names, in declaration order
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Next field id to assign; monotonic across the schema's lifetime
    pub(crate) next_field_id: i32,
}

impl TableSchema {
    /// Build the initial schema (version 0) from column declarations.
    /// Field ids are assigned in declaration order starting at 0.
    pub fn from_columns(columns: Vec<ColumnDef>) -> Self {
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(i, col)| SchemaField {
                id: i as i32,
                name: col.name,
                field_type: col.field_type,
                nullable: col.nullable,
                comment: col.comment,
            })
            .collect::<Vec<_>>();
        let next_field_id = fields.len() as i32;
        Self {
            schema_id: 0,
            fields,
            partition_keys: Vec::new(),
            primary_keys: Vec::new(),
            options: HashMap::new(),
            comment: None,
            next_field_id,
        }
    }

    pub fn with_partition_keys(mut self, keys: Vec<String>) -> Self {
        self.partition_keys = keys;
        self
    }

    pub fn with_primary_keys(mut self, keys: Vec<String>) -> Self {
        self.primary_keys = keys;
        self
    }

    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Next field id that would be assigned to a new column.
    pub fn next_field_id(&self) -> i32 {
        self.next_field_id
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_index(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Placement of a column within the field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPosition {
    /// Move to / insert at the front
    First,
    /// Place immediately after the named column
    After(String),
}

/// A single schema change operation.
///
/// Changes are applied in order; each one sees the schema as left by the
/// previous change in the same batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableChangeOp {
    AddColumn {
        name: String,
        field_type: String,
        #[serde(default = "default_nullable")]
        nullable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        /// Appended at the end when unset
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<ColumnPosition>,
    },
    DropColumn {
        name: String,
    },
    RenameColumn {
        old_name: String,
        new_name: String,
    },
    ChangeColumnType {
        name: String,
        new_type: String,
    },
    ReorderColumn {
        name: String,
        position: ColumnPosition,
    },
    ChangeColumnComment {
        name: String,
        comment: Option<String>,
    },
}

impl fmt::Display for TableChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableChangeOp::AddColumn { name, .. } => write!(f, "add column [{name}]"),
            TableChangeOp::DropColumn { name } => write!(f, "drop column [{name}]"),
            TableChangeOp::RenameColumn { old_name, new_name } => {
                write!(f, "rename column [{old_name}] to [{new_name}]")
            }
            TableChangeOp::ChangeColumnType { name, new_type } => {
                write!(f, "change type of column [{name}] to [{new_type}]")
            }
            TableChangeOp::ReorderColumn { name, .. } => write!(f, "reorder column [{name}]"),
            TableChangeOp::ChangeColumnComment { name, .. } => {
                write!(f, "change comment of column [{name}]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_assigns_sequential_ids() {
        let schema = TableSchema::from_columns(vec![
            ColumnDef::new("id", "int").not_null(),
            ColumnDef::new("name", "string"),
            ColumnDef::new("dt", "string"),
        ]);
        assert_eq!(schema.schema_id, 0);
        assert_eq!(schema.next_field_id(), 3);
        let ids: Vec<_> = schema.fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_field_lookup() {
        let schema =
            TableSchema::from_columns(vec![ColumnDef::new("a", "int"), ColumnDef::new("b", "int")]);
        assert!(schema.has_field("a"));
        assert_eq!(schema.field_index("b"), Some(1));
        assert!(schema.field("c").is_none());
    }

    #[test]
    fn test_schema_json_round_trip_keeps_next_field_id() {
        let schema = TableSchema::from_columns(vec![ColumnDef::new("a", "int")]);
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.next_field_id(), 1);
        assert_eq!(back, schema);
    }
}
