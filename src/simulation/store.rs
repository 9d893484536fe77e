//! In-memory document store backing the simulated account.
//!
//! One `RangeState` per partition key range. Every write bumps the range LSN
//! and appends to the range's change log.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::routing::{PartitionKey, PartitionKeyRange, EPK_SPACE_END};
use crate::transport::status;

/// Document key inside a range: partition key header value and id.
pub(crate) type DocumentKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("document already exists")]
    Conflict,
    #[error("etag mismatch")]
    PreconditionFailed,
    #[error("payload is not a JSON object")]
    BadRequest,
}

impl StoreError {
    pub(crate) fn status(&self) -> u16 {
        match self {
            Self::NotFound => status::NOT_FOUND,
            Self::Conflict => status::CONFLICT,
            Self::PreconditionFailed => status::PRECONDITION_FAILED,
            Self::BadRequest => status::BAD_REQUEST,
        }
    }
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub(crate) struct StoredDocument {
    pub body: Value,
    pub etag: String,
    pub partition_key: PartitionKey,
}

#[derive(Debug, Clone)]
pub(crate) struct RangeState {
    pub range: PartitionKeyRange,
    pub lsn: u64,
    /// Highest LSN replicated to the other regions
    pub committed_lsn: u64,
    /// HEAD polls left before `committed_lsn` catches up
    pub pending_polls: u32,
    documents: BTreeMap<DocumentKey, StoredDocument>,
    changes: Vec<(u64, DocumentKey)>,
}

impl RangeState {
    fn new(range: PartitionKeyRange, lsn: u64) -> Self {
        Self {
            range,
            lsn,
            committed_lsn: lsn,
            pending_polls: 0,
            documents: BTreeMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn read(&self, key: &DocumentKey) -> StoreResult<&StoredDocument> {
        self.documents.get(key).ok_or(StoreError::NotFound)
    }

    pub fn create(&mut self, key: DocumentKey, pk: PartitionKey, body: Value, lag: u32) -> StoreResult<StoredDocument> {
        if self.documents.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        Ok(self.put(key, pk, body, lag))
    }

    /// Returns the document and whether it was created.
    pub fn upsert(&mut self, key: DocumentKey, pk: PartitionKey, body: Value, lag: u32) -> (StoredDocument, bool) {
        let created = !self.documents.contains_key(&key);
        (self.put(key, pk, body, lag), created)
    }

    pub fn replace(
        &mut self,
        key: DocumentKey,
        pk: PartitionKey,
        body: Value,
        if_match: Option<&str>,
        lag: u32,
    ) -> StoreResult<StoredDocument> {
        self.check_etag(&key, if_match)?;
        Ok(self.put(key, pk, body, lag))
    }

    /// Merge top-level fields of `updates` into the stored document.
    pub fn patch(&mut self, key: DocumentKey, updates: Value, if_match: Option<&str>, lag: u32) -> StoreResult<StoredDocument> {
        self.check_etag(&key, if_match)?;
        let current = self.read(&key)?.clone();
        let mut body = current.body;
        match (body.as_object_mut(), updates.as_object()) {
            (Some(doc), Some(updates)) => {
                for (k, v) in updates {
                    doc.insert(k.clone(), v.clone());
                }
            }
            _ => return Err(StoreError::BadRequest),
        }
        Ok(self.put(key, current.partition_key, body, lag))
    }

    pub fn delete(&mut self, key: &DocumentKey, if_match: Option<&str>, lag: u32) -> StoreResult<()> {
        self.check_etag(key, if_match)?;
        self.documents.remove(key);
        self.commit(key.clone(), lag);
        Ok(())
    }

    /// Documents in key order, from `offset`, at most `limit`.
    pub fn page(&self, offset: usize, limit: usize) -> (Vec<Value>, bool) {
        let items: Vec<Value> = self
            .documents
            .values()
            .skip(offset)
            .take(limit)
            .map(|d| d.body.clone())
            .collect();
        let more = self.documents.len() > offset + items.len();
        (items, more)
    }

    /// Current versions of documents changed after `since`.
    pub fn changes_since(&self, since: u64) -> Vec<Value> {
        let mut seen = std::collections::BTreeSet::new();
        self.changes
            .iter()
            .filter(|(lsn, _)| *lsn > since)
            .filter(|(_, key)| seen.insert(key.clone()))
            .filter_map(|(_, key)| self.documents.get(key).map(|d| d.body.clone()))
            .collect()
    }

    /// A HEAD poll observed the range; replication advances.
    pub fn observe_poll(&mut self) {
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            if self.pending_polls == 0 {
                self.committed_lsn = self.lsn;
            }
        }
    }

    fn check_etag(&self, key: &DocumentKey, if_match: Option<&str>) -> StoreResult<()> {
        let current = self.read(key)?;
        match if_match {
            Some(etag) if etag != current.etag => Err(StoreError::PreconditionFailed),
            _ => Ok(()),
        }
    }

    fn put(&mut self, key: DocumentKey, pk: PartitionKey, mut body: Value, lag: u32) -> StoredDocument {
        let lsn = self.commit(key.clone(), lag);
        let etag = format!("\"{:08x}-{}\"", crc32fast::hash(body.to_string().as_bytes()), lsn);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(key.1.clone()));
            obj.insert("_etag".to_string(), Value::String(etag.clone()));
            obj.insert("_lsn".to_string(), Value::from(lsn));
        }
        let document = StoredDocument {
            body,
            etag,
            partition_key: pk,
        };
        self.documents.insert(key, document.clone());
        document
    }

    fn commit(&mut self, key: DocumentKey, lag: u32) -> u64 {
        self.lsn += 1;
        self.changes.push((self.lsn, key));
        if lag == 0 {
            self.committed_lsn = self.lsn;
        } else {
            self.pending_polls = lag;
        }
        self.lsn
    }
}

/// Ranges of one container.
#[derive(Debug, Clone)]
pub(crate) struct ContainerState {
    ranges: Vec<RangeState>,
    next_range_id: u64,
}

impl ContainerState {
    /// Split the key space evenly into `range_count` ranges.
    pub fn new(range_count: u32, initial_lsn: u64) -> Self {
        let count = u64::from(range_count.max(1));
        let width = EPK_SPACE_END / count;
        let ranges = (0..count)
            .map(|i| {
                let max = if i + 1 == count { EPK_SPACE_END } else { (i + 1) * width };
                RangeState::new(PartitionKeyRange::new(i.to_string(), i * width, max), initial_lsn)
            })
            .collect();
        Self {
            ranges,
            next_range_id: count,
        }
    }

    pub fn ranges(&self) -> Vec<PartitionKeyRange> {
        self.ranges.iter().map(|r| r.range.clone()).collect()
    }

    pub fn range_mut(&mut self, id: &str) -> Option<&mut RangeState> {
        self.ranges.iter_mut().find(|r| r.range.id == id)
    }

    pub fn range_for_key_mut(&mut self, key: &PartitionKey) -> Option<&mut RangeState> {
        let hash = key.effective_hash();
        self.ranges.iter_mut().find(|r| r.range.contains(hash))
    }

    /// Split `id` in two halves; documents move with their hash.
    /// Returns the child range ids.
    pub fn split(&mut self, id: &str) -> Option<(String, String)> {
        let pos = self.ranges.iter().position(|r| r.range.id == id)?;
        let parent = self.ranges.remove(pos);
        let mid = parent.range.min_inclusive + (parent.range.max_exclusive - parent.range.min_inclusive) / 2;

        let left_id = self.next_range_id.to_string();
        let right_id = (self.next_range_id + 1).to_string();
        self.next_range_id += 2;

        let mut left = PartitionKeyRange::new(left_id.clone(), parent.range.min_inclusive, mid);
        let mut right = PartitionKeyRange::new(right_id.clone(), mid, parent.range.max_exclusive);
        left.parents = vec![parent.range.id.clone()];
        right.parents = vec![parent.range.id.clone()];

        let mut left = RangeState::new(left, parent.lsn);
        let mut right = RangeState::new(right, parent.lsn);
        for (key, document) in parent.documents {
            let target = if left.range.contains(document.partition_key.effective_hash()) {
                &mut left
            } else {
                &mut right
            };
            target.changes.push((parent.lsn, key.clone()));
            target.documents.insert(key, document);
        }

        self.ranges.insert(pos, right);
        self.ranges.insert(pos, left);
        Some((left_id, right_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(pk: &PartitionKey, id: &str) -> DocumentKey {
        (pk.to_header_value(), id.to_string())
    }

    #[test]
    fn test_create_conflict_and_etag() {
        let mut container = ContainerState::new(1, 0);
        let pk = PartitionKey::from("tenant");
        let range = container.range_for_key_mut(&pk).unwrap();

        let doc = range.create(key(&pk, "1"), pk.clone(), json!({"v": 1}), 0).unwrap();
        assert_eq!(range.lsn, 1);
        assert_eq!(
            range.create(key(&pk, "1"), pk.clone(), json!({"v": 2}), 0).unwrap_err(),
            StoreError::Conflict
        );
        assert_eq!(
            range
                .replace(key(&pk, "1"), pk.clone(), json!({"v": 3}), Some("\"stale\""), 0)
                .unwrap_err(),
            StoreError::PreconditionFailed
        );
        assert!(range
            .replace(key(&pk, "1"), pk.clone(), json!({"v": 3}), Some(&doc.etag), 0)
            .is_ok());
    }

    #[test]
    fn test_replication_lag_catches_up_after_polls() {
        let mut container = ContainerState::new(1, 10);
        let pk = PartitionKey::from("tenant");
        let range = container.range_for_key_mut(&pk).unwrap();
        range.create(key(&pk, "1"), pk.clone(), json!({}), 2).unwrap();
        assert_eq!((range.lsn, range.committed_lsn), (11, 10));

        range.observe_poll();
        assert_eq!(range.committed_lsn, 10);
        range.observe_poll();
        assert_eq!(range.committed_lsn, 11);
    }

    #[test]
    fn test_split_moves_documents() {
        let mut container = ContainerState::new(1, 0);
        for i in 0..20 {
            let pk = PartitionKey::from(format!("pk-{}", i));
            let range = container.range_for_key_mut(&pk).unwrap();
            range.create(key(&pk, "doc"), pk.clone(), json!({}), 0).unwrap();
        }

        let (left, right) = container.split("0").unwrap();
        assert!(container.range_mut("0").is_none());
        let total = container.range_mut(&left).unwrap().page(0, 100).0.len()
            + container.range_mut(&right).unwrap().page(0, 100).0.len();
        assert_eq!(total, 20);
        assert_eq!(container.ranges()[0].parents, vec!["0".to_string()]);
    }

    #[test]
    fn test_change_feed_dedups_keys() {
        let mut container = ContainerState::new(1, 0);
        let pk = PartitionKey::from("tenant");
        let range = container.range_for_key_mut(&pk).unwrap();
        range.upsert(key(&pk, "1"), pk.clone(), json!({"v": 1}), 0);
        range.upsert(key(&pk, "1"), pk.clone(), json!({"v": 2}), 0);
        let changes = range.changes_since(0);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["v"], 2);
        assert!(range.changes_since(range.lsn).is_empty());
    }
}
