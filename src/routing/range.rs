//! Partition key ranges and the per-container routing map.

use serde::{Deserialize, Serialize};

use super::errors::{RoutingError, RoutingResult};
use super::partition_key::{PartitionKey, EPK_SPACE_END};

/// A contiguous slice `[min_inclusive, max_exclusive)` of the hash space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: u64,
    pub max_exclusive: u64,
    /// Ranges this one was split from.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new(id: impl Into<String>, min_inclusive: u64, max_exclusive: u64) -> Self {
        Self {
            id: id.into(),
            min_inclusive,
            max_exclusive,
            parents: Vec::new(),
        }
    }

    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.min_inclusive && hash < self.max_exclusive
    }
}

/// Sorted, gap-free set of ranges for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRoutingMap {
    container: String,
    ranges: Vec<PartitionKeyRange>,
}

impl PartitionRoutingMap {
    /// Build a map, rejecting range sets with gaps or overlaps.
    pub fn try_new(container: &str, mut ranges: Vec<PartitionKeyRange>) -> RoutingResult<Self> {
        ranges.sort_by_key(|r| r.min_inclusive);

        let mut expected_min = 0;
        for range in &ranges {
            if range.min_inclusive != expected_min || range.max_exclusive <= range.min_inclusive {
                return Err(RoutingError::IncompleteRoutingMap(container.to_string()));
            }
            expected_min = range.max_exclusive;
        }
        if expected_min != EPK_SPACE_END {
            return Err(RoutingError::IncompleteRoutingMap(container.to_string()));
        }

        Ok(Self {
            container: container.to_string(),
            ranges,
        })
    }

    /// Single range covering the whole key space.
    pub fn single(container: &str) -> Self {
        Self {
            container: container.to_string(),
            ranges: vec![PartitionKeyRange::new("0", 0, EPK_SPACE_END)],
        }
    }

    pub fn ranges(&self) -> &[PartitionKeyRange] {
        &self.ranges
    }

    pub fn range_for_key(&self, key: &PartitionKey) -> RoutingResult<&PartitionKeyRange> {
        let hash = key.effective_hash();
        // Ranges are sorted and contiguous.
        let idx = self.ranges.partition_point(|r| r.max_exclusive <= hash);
        self.ranges
            .get(idx)
            .filter(|r| r.contains(hash))
            .ok_or_else(|| RoutingError::RangeNotFound {
                container: self.container.clone(),
                range: format!("hash {}", hash),
            })
    }

    pub fn range_by_id(&self, id: &str) -> RoutingResult<&PartitionKeyRange> {
        self.ranges
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RoutingError::RangeNotFound {
                container: self.container.clone(),
                range: id.to_string(),
            })
    }
}
