//! CDC envelope decoding.
//!
//! Change events arrive as JSON envelopes with a `schema` block describing the
//! row shape and a `payload` block carrying the change itself. An envelope is
//! either a data change (insert / update / delete / snapshot read) or a schema
//! change carrying a serialized DDL-history record. The two are distinguished
//! by the `op` field: a payload without `op` is a schema change.

mod event;
mod history;

pub use event::{
    decode_envelope, ChangeEnvelope, ChangeEvent, DataOperation, FieldSchema, SourceInfo,
};
pub use history::SchemaHistoryExtractor;
