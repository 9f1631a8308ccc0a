//! Partition specifications.
//!
//! A partition is an ordered mapping from partition column names to string
//! values. Order matters: it determines the storage path layout, so two specs
//! with the same entries in different orders are different partitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered partition column/value mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PartitionSpec(Vec<(String, String)>);

impl PartitionSpec {
    /// Create an empty spec.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a spec from ordered column/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Single-column spec, used for tag-to-partition mapping.
    pub fn single(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![(column.into(), value.into())])
    }

    /// Append a column/value pair, preserving insertion order.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.push((column.into(), value.into()));
    }

    /// Value for a partition column, if present.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over column/value pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    /// Partition column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    /// Hive-style path segment, e.g. `dt=2025-01-01/hh=10`.
    pub fn hive_path(&self) -> String {
        self.0
            .iter()
            .map(|(c, v)| format!("{c}={v}"))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hive_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_preserved() {
        let spec = PartitionSpec::from_pairs([("ptb", "1a"), ("pta", "1")]);
        let columns: Vec<_> = spec.columns().collect();
        assert_eq!(columns, vec!["ptb", "pta"]);
        assert_eq!(spec.hive_path(), "ptb=1a/pta=1");
    }

    #[test]
    fn test_order_distinguishes_specs() {
        let a = PartitionSpec::from_pairs([("x", "1"), ("y", "2")]);
        let b = PartitionSpec::from_pairs([("y", "2"), ("x", "1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_and_single() {
        let spec = PartitionSpec::single("dt", "2025-01-01");
        assert_eq!(spec.get("dt"), Some("2025-01-01"));
        assert_eq!(spec.get("hh"), None);
        assert_eq!(spec.len(), 1);
    }
}
