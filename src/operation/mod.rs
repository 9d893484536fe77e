//! Logical Operation Model
//!
//! Every request the client issues is described by a `LogicalOperation`.
//! The operation is immutable once dispatched; retries, hedges and barrier
//! polls all derive their store requests from it.

mod kinds;
mod options;

pub use kinds::{ConsistencyLevel, OperationType, PriorityLevel, ResourceType};
pub use options::RequestOptions;

use std::fmt;

use crate::routing::PartitionKey;

/// Where inside a container an operation is routed.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationTarget {
    /// Container or database level request, no partition routing.
    None,
    /// Route by hashing the partition key.
    PartitionKey(PartitionKey),
    /// Route to an explicit partition key range (feeds, queries, barriers).
    Range(String),
}

/// A single logical request against the service.
#[derive(Debug, Clone)]
pub struct LogicalOperation {
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    /// Container link, e.g. `dbs/orders/colls/items`.
    pub container: String,
    pub target: OperationTarget,
    pub item_id: Option<String>,
    /// Opaque body bytes. Never inspected by the core.
    pub payload: Option<Vec<u8>>,
    /// Feed continuation for query and change feed pages.
    pub continuation: Option<String>,
}

impl LogicalOperation {
    pub fn new(
        resource_type: ResourceType,
        operation_type: OperationType,
        container: impl Into<String>,
        target: OperationTarget,
    ) -> Self {
        Self {
            resource_type,
            operation_type,
            container: container.into(),
            target,
            item_id: None,
            payload: None,
            continuation: None,
        }
    }

    pub fn with_item_id(mut self, id: impl Into<String>) -> Self {
        self.item_id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.continuation = Some(continuation.into());
        self
    }

    pub fn read_item(container: &str, partition_key: PartitionKey, id: &str) -> Self {
        Self::document(OperationType::Read, container, partition_key).with_item_id(id)
    }

    pub fn create_item(container: &str, partition_key: PartitionKey, id: &str, body: Vec<u8>) -> Self {
        Self::document(OperationType::Create, container, partition_key)
            .with_item_id(id)
            .with_payload(body)
    }

    pub fn upsert_item(container: &str, partition_key: PartitionKey, id: &str, body: Vec<u8>) -> Self {
        Self::document(OperationType::Upsert, container, partition_key)
            .with_item_id(id)
            .with_payload(body)
    }

    pub fn replace_item(container: &str, partition_key: PartitionKey, id: &str, body: Vec<u8>) -> Self {
        Self::document(OperationType::Replace, container, partition_key)
            .with_item_id(id)
            .with_payload(body)
    }

    pub fn delete_item(container: &str, partition_key: PartitionKey, id: &str) -> Self {
        Self::document(OperationType::Delete, container, partition_key).with_item_id(id)
    }

    pub fn batch(container: &str, partition_key: PartitionKey, body: Vec<u8>) -> Self {
        Self::document(OperationType::Batch, container, partition_key).with_payload(body)
    }

    /// Query a single partition key range; the query text travels as payload.
    pub fn query(container: &str, range_id: &str, query: Vec<u8>) -> Self {
        Self::new(
            ResourceType::Document,
            OperationType::Query,
            container,
            OperationTarget::Range(range_id.to_string()),
        )
        .with_payload(query)
    }

    pub fn change_feed(container: &str, range_id: &str) -> Self {
        Self::new(
            ResourceType::Document,
            OperationType::ChangeFeed,
            container,
            OperationTarget::Range(range_id.to_string()),
        )
    }

    pub fn read_container(container: &str) -> Self {
        Self::new(
            ResourceType::Collection,
            OperationType::Read,
            container,
            OperationTarget::None,
        )
    }

    fn document(operation_type: OperationType, container: &str, partition_key: PartitionKey) -> Self {
        Self::new(
            ResourceType::Document,
            operation_type,
            container,
            OperationTarget::PartitionKey(partition_key),
        )
    }

    pub fn is_read_only(&self) -> bool {
        self.operation_type.is_read_only()
    }

    pub fn is_write(&self) -> bool {
        !self.is_read_only()
    }

    /// Whether resending the operation after an ambiguous failure is safe.
    pub fn is_idempotent(&self, options: &RequestOptions) -> bool {
        self.is_read_only()
            || (self.operation_type.is_conditionally_idempotent() && options.if_match.is_some())
    }

    /// Short label used for trace names and log fields.
    pub fn name(&self) -> String {
        format!("{}{}", self.operation_type.as_str(), self.resource_type.as_str())
    }
}

impl fmt::Display for LogicalOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.container)?;
        if let Some(ref id) = self.item_id {
            write!(f, "/docs/{}", id)?;
        }
        Ok(())
    }
}
