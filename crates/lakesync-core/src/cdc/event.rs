//! Change event envelope decoding.

use crate::error::CdcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

/// Row-shape description from the envelope `schema` block.
///
/// Field schemas nest: a `struct` field carries its member fields in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldSchema {
    /// Field name within the parent struct; absent on the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Wire type, e.g. `struct`, `string`, `int32`
    #[serde(rename = "type", default)]
    pub type_name: String,

    /// Logical type name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub optional: bool,

    /// Member fields of a struct, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    /// Member field by name.
    pub fn member(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.field.as_deref() == Some(name))
    }

    /// Merged field list of the `before` and `after` structs.
    ///
    /// Order follows first appearance; when both structs declare the same
    /// field the `after` declaration wins. This gives the row shape even for
    /// deletes, where only `before` is populated.
    pub fn before_and_after_fields(&self) -> Vec<FieldSchema> {
        let mut merged: Vec<FieldSchema> = Vec::new();
        for branch in ["before", "after"] {
            let Some(branch_schema) = self.member(branch) else {
                continue;
            };
            for field in &branch_schema.fields {
                match merged.iter_mut().find(|m| m.field == field.field) {
                    Some(existing) => *existing = field.clone(),
                    None => merged.push(field.clone()),
                }
            }
        }
        merged
    }
}

/// Source table coordinates carried by every change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub db: String,
    pub table: String,
    /// Source-side event timestamp, when the connector provides one
    pub ts_millis: Option<i64>,
}

/// Data change kind, decoded from the single-letter `op` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOperation {
    Insert,
    Update,
    Delete,
    /// Snapshot read emitted during initial sync
    Read,
}

impl DataOperation {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(DataOperation::Insert),
            "u" => Some(DataOperation::Update),
            "d" => Some(DataOperation::Delete),
            "r" => Some(DataOperation::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataOperation::Insert => "insert",
            DataOperation::Update => "update",
            DataOperation::Delete => "delete",
            DataOperation::Read => "read",
        }
    }
}

/// A decoded change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// DDL happened upstream; `history_record` is the serialized history
    /// payload for [`SchemaHistoryExtractor`](crate::cdc::SchemaHistoryExtractor)
    SchemaChange {
        source: SourceInfo,
        history_record: String,
    },
    /// A row changed
    DataChange {
        source: SourceInfo,
        op: DataOperation,
        before: Option<Value>,
        after: Option<Value>,
    },
}

impl ChangeEvent {
    pub fn source(&self) -> &SourceInfo {
        match self {
            ChangeEvent::SchemaChange { source, .. } => source,
            ChangeEvent::DataChange { source, .. } => source,
        }
    }

    pub fn is_schema_change(&self) -> bool {
        matches!(self, ChangeEvent::SchemaChange { .. })
    }
}

/// A decoded envelope: the event plus the optional row-shape schema block.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEnvelope {
    pub schema: Option<FieldSchema>,
    pub event: ChangeEvent,
}

#[derive(Deserialize)]
struct RawEnvelope {
    schema: Option<FieldSchema>,
    payload: Option<RawPayload>,
}

#[derive(Deserialize)]
struct RawPayload {
    source: Option<RawSource>,
    before: Option<Value>,
    after: Option<Value>,
    op: Option<String>,
    #[serde(rename = "historyRecord")]
    history_record: Option<String>,
}

#[derive(Deserialize)]
struct RawSource {
    db: Option<String>,
    table: Option<String>,
    ts_ms: Option<i64>,
}

/// Decode a raw JSON envelope into a typed change event.
///
/// Every required field is checked explicitly; a missing `payload`, `source`,
/// or source coordinate is a [`CdcError::MalformedEvent`]. A payload without
/// `op` must carry `historyRecord`, and an unknown `op` code is rejected.
pub fn decode_envelope(raw: &[u8]) -> Result<ChangeEnvelope, CdcError> {
    let envelope: RawEnvelope = serde_json::from_slice(raw)
        .map_err(|e| CdcError::malformed(format!("invalid JSON: {e}")))?;

    let payload = envelope
        .payload
        .ok_or_else(|| CdcError::malformed("missing payload"))?;

    let raw_source = payload
        .source
        .ok_or_else(|| CdcError::malformed("missing payload.source"))?;
    let source = SourceInfo {
        db: raw_source
            .db
            .ok_or_else(|| CdcError::malformed("missing payload.source.db"))?,
        table: raw_source
            .table
            .ok_or_else(|| CdcError::malformed("missing payload.source.table"))?,
        ts_millis: raw_source.ts_ms,
    };

    let event = match payload.op {
        // No op code means the event is a schema change
        None => {
            let history_record = payload.history_record.ok_or_else(|| {
                CdcError::malformed("payload carries neither op nor historyRecord")
            })?;
            trace!(db = %source.db, table = %source.table, "decoded schema change event");
            ChangeEvent::SchemaChange {
                source,
                history_record,
            }
        }
        Some(code) => {
            let op = DataOperation::from_code(&code)
                .ok_or_else(|| CdcError::malformed(format!("unknown op code [{code}]")))?;
            trace!(db = %source.db, table = %source.table, op = op.as_str(), "decoded data change event");
            ChangeEvent::DataChange {
                source,
                op,
                before: payload.before,
                after: payload.after,
            }
        }
    };

    Ok(ChangeEnvelope {
        schema: envelope.schema,
        event,
    })
}
