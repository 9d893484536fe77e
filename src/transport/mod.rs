//! Transport contract
//!
//! The core never opens sockets. It hands a `StoreRequest` to a `Transport`
//! and interprets the `StoreResponse` or `TransportError` it gets back.
//!
//! Failures may be signalled two ways: as a response carrying an error status,
//! or as `TransportError::Server` carrying the same status and sub-status.
//! Both are classified identically by the retry engine.

pub mod codes;
pub mod headers;

pub use codes::{is_non_transient, status, sub_status};
pub use headers::Headers;

use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{LogicalOperation, OperationType, ResourceType};
use crate::routing::{PartitionKey, Region};

/// How the client reaches replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Talk to replicas directly; the resolver returns replica sets.
    #[default]
    Direct,
    /// Talk to a regional gateway that forwards to replicas.
    Gateway,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Gateway => "Gateway",
        }
    }
}

/// A physical address in a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub region: Region,
    pub address: String,
}

impl Endpoint {
    pub fn new(region: Region, address: impl Into<String>) -> Self {
        Self {
            region,
            address: address.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.region)
    }
}

/// A single physical request derived from a logical operation.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub container: String,
    pub partition_key_range_id: Option<String>,
    pub partition_key: Option<PartitionKey>,
    pub item_id: Option<String>,
    pub headers: Headers,
    pub payload: Option<Vec<u8>>,
}

impl StoreRequest {
    pub fn from_operation(op: &LogicalOperation, range_id: Option<String>) -> Self {
        let partition_key = match op.target {
            crate::operation::OperationTarget::PartitionKey(ref pk) => Some(pk.clone()),
            _ => None,
        };
        Self {
            resource_type: op.resource_type,
            operation_type: op.operation_type,
            container: op.container.clone(),
            partition_key_range_id: range_id,
            partition_key,
            item_id: op.item_id.clone(),
            headers: Headers::new(),
            payload: op.payload.clone(),
        }
    }

    /// HEAD request against the container, used by the write barrier.
    pub fn head_collection(container: &str, range_id: Option<String>) -> Self {
        Self {
            resource_type: ResourceType::Collection,
            operation_type: OperationType::Head,
            container: container.to_string(),
            partition_key_range_id: range_id,
            partition_key: None,
            item_id: None,
            headers: Headers::new(),
            payload: None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.operation_type.is_read_only()
    }
}

/// A response as returned by a replica or gateway.
#[derive(Debug, Clone, Default)]
pub struct StoreResponse {
    pub status: u16,
    pub headers: Headers,
    pub payload: Option<Vec<u8>>,
}

impl StoreResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            payload: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn sub_status(&self) -> u32 {
        self.headers.sub_status().unwrap_or(sub_status::UNKNOWN)
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Failures raised by the transport instead of a response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No response within the transport's own timeout
    #[error("request to {endpoint} timed out")]
    Timeout {
        endpoint: String,
        /// Whether any bytes of the request reached the wire.
        request_sent: bool,
    },

    /// The channel broke mid-request
    #[error("connection to {endpoint} broken: {reason}")]
    ConnectionBroken {
        endpoint: String,
        reason: String,
        request_sent: bool,
    },

    /// The service answered with an error status, delivered as an exception
    #[error("server returned {status}/{sub_status}: {message}")]
    Server {
        status: u16,
        sub_status: u32,
        message: String,
        headers: Headers,
    },

    /// The endpoint could not be reached at all
    #[error("endpoint {0} unreachable")]
    EndpointUnreachable(String),
}

impl TransportError {
    pub fn server(status: u16, sub_status: u32, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            sub_status,
            message: message.into(),
            headers: Headers::new(),
        }
    }

    /// Whether the request may have been applied by the service.
    ///
    /// Status-bearing failures were rejected; a channel failure after the
    /// request left the client is ambiguous.
    pub fn may_have_committed(&self) -> bool {
        match self {
            Self::Timeout { request_sent, .. } => *request_sent,
            Self::ConnectionBroken { request_sent, .. } => *request_sent,
            Self::Server { .. } | Self::EndpointUnreachable(_) => false,
        }
    }

    pub fn status(&self) -> Option<(u16, u32)> {
        match self {
            Self::Server {
                status, sub_status, ..
            } => Some((*status, *sub_status)),
            _ => None,
        }
    }

    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Self::Server { headers, .. } => Some(headers),
            _ => None,
        }
    }
}

/// Byte-level request/response channel to a replica or gateway.
pub trait Transport: Send + Sync {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a StoreRequest,
    ) -> BoxFuture<'a, Result<StoreResponse, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_never_committed() {
        let err = TransportError::server(status::GONE, 0, "gone");
        assert!(!err.may_have_committed());
        assert_eq!(err.status(), Some((410, 0)));
    }

    #[test]
    fn test_sent_timeout_is_ambiguous() {
        let sent = TransportError::Timeout {
            endpoint: "rntbd://a".into(),
            request_sent: true,
        };
        let unsent = TransportError::ConnectionBroken {
            endpoint: "rntbd://a".into(),
            reason: "reset".into(),
            request_sent: false,
        };
        assert!(sent.may_have_committed());
        assert!(!unsent.may_have_committed());
    }

    #[test]
    fn test_head_collection_request() {
        let request = StoreRequest::head_collection("dbs/db/colls/c", Some("0".into()));
        assert_eq!(request.resource_type, ResourceType::Collection);
        assert_eq!(request.operation_type, OperationType::Head);
        assert!(request.is_read_only());
    }
}
