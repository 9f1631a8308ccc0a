//! Table schemas and schema evolution.
//!
//! This module provides the table schema model and the applier that evolves a
//! schema through an ordered batch of table changes:
//!
//! - Field ids are assigned monotonically and never reused
//! - Every applied batch produces a new schema version
//! - A batch applies atomically: one bad change rejects the whole batch

mod apply;
mod types;

pub use apply::apply_table_changes;
pub use types::{ColumnDef, ColumnPosition, SchemaField, TableChangeOp, TableSchema};
