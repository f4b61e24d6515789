//! Asset and partition identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a logical data asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(String);

impl AssetKey {
    /// Create a new asset key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AssetKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier scoping an asset to a subset of its data (e.g. a date).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create a new partition key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The unit of scheduling decisions: an asset plus an optional partition.
///
/// Unpartitioned assets have exactly one implicit partition, represented by
/// `partition: None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPartition {
    /// The asset
    pub asset: AssetKey,

    /// The partition, if the asset is partitioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionKey>,
}

impl AssetPartition {
    /// The implicit partition of an unpartitioned asset.
    pub fn unpartitioned(asset: impl Into<AssetKey>) -> Self {
        Self {
            asset: asset.into(),
            partition: None,
        }
    }

    /// A concrete partition of a partitioned asset.
    pub fn new(asset: impl Into<AssetKey>, partition: impl Into<PartitionKey>) -> Self {
        Self {
            asset: asset.into(),
            partition: Some(partition.into()),
        }
    }
}

impl fmt::Display for AssetPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(p) => write!(f, "{}[{}]", self.asset, p),
            None => write!(f, "{}", self.asset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AssetPartition::unpartitioned("orders").to_string(), "orders");
        assert_eq!(AssetPartition::new("orders", "2024-01-01").to_string(), "orders[2024-01-01]");
    }

    #[test]
    fn test_unpartitioned_serializes_without_partition() {
        let json = serde_json::to_string(&AssetPartition::unpartitioned("orders")).unwrap();
        assert_eq!(json, r#"{"asset":"orders"}"#);

        let back: AssetPartition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.partition, None);
    }
}
