//! Partition keys and effective partition key hashing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exclusive upper bound of the effective partition key space.
pub const EPK_SPACE_END: u64 = 1 << 32;

/// A logical partition key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Value);

impl PartitionKey {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The key used for items stored without a partition key.
    pub fn none() -> Self {
        Self(Value::Null)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Hash of the canonical JSON form, used to pick the owning range.
    pub fn effective_hash(&self) -> u64 {
        let canonical = self.0.to_string();
        u64::from(crc32fast::hash(canonical.as_bytes()))
    }

    /// Header representation, a JSON array with one component.
    pub fn to_header_value(&self) -> String {
        Value::Array(vec![self.0.clone()]).to_string()
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<i64> for PartitionKey {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

impl From<bool> for PartitionKey {
    fn from(value: bool) -> Self {
        Self(Value::Bool(value))
    }
}
