//! Resource, operation and consistency kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of resource an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Database,
    Collection,
    Document,
    PartitionKeyRange,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "Database",
            Self::Collection => "Collection",
            Self::Document => "Document",
            Self::PartitionKeyRange => "PartitionKeyRange",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation performed against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Read,
    Replace,
    Upsert,
    Delete,
    Patch,
    Query,
    ReadFeed,
    Batch,
    ChangeFeed,
    Head,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Replace => "Replace",
            Self::Upsert => "Upsert",
            Self::Delete => "Delete",
            Self::Patch => "Patch",
            Self::Query => "Query",
            Self::ReadFeed => "ReadFeed",
            Self::Batch => "Batch",
            Self::ChangeFeed => "ChangeFeed",
            Self::Head => "Head",
        }
    }

    /// Operations that never mutate server state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Read | Self::Query | Self::ReadFeed | Self::ChangeFeed | Self::Head
        )
    }

    /// Mutations that become safe to resend when guarded by an ETag precondition.
    pub fn is_conditionally_idempotent(&self) -> bool {
        matches!(self, Self::Replace | Self::Upsert | Self::Delete | Self::Patch)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read consistency levels, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    ConsistentPrefix,
    Eventual,
}

impl ConsistencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
            Self::Session => "Session",
            Self::ConsistentPrefix => "ConsistentPrefix",
            Self::Eventual => "Eventual",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Strong => 4,
            Self::BoundedStaleness => 3,
            Self::Session => 2,
            Self::ConsistentPrefix => 1,
            Self::Eventual => 0,
        }
    }

    /// A request may relax the account consistency, never strengthen it.
    pub fn is_valid_override_of(&self, account_default: ConsistencyLevel) -> bool {
        self.rank() <= account_default.rank()
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Throughput priority attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityLevel {
    High,
    Low,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Low => "Low",
        }
    }
}
