//! Client Error Types
//!
//! Terminal failures that cross the client boundary. Recoverable failures are
//! absorbed by the retry and hedging loops and never surface here.

use thiserror::Error;

use crate::diagnostics::CosmosDiagnostics;
use crate::routing::RoutingError;
use crate::transport::{status, sub_status};

/// Client result type
pub type CosmosResult<T> = Result<T, CosmosError>;

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rate too large after all throttling retries
    Throttled,
    /// No replica could satisfy the session token
    SessionNotFound,
    /// Service or region unavailable, including exhausted gone retries
    ServiceUnavailable,
    /// Write committed at the primary but the replication barrier never converged
    ConsistencyBarrierTimeout,
    /// Caller cancelled the operation
    Cancelled,
    /// End-to-end budget elapsed
    Timeout,
    NotFound,
    PreconditionFailed,
    Conflict,
    BadRequest,
    Forbidden,
    /// Invalid client or request configuration
    Configuration,
    /// Any other terminal status
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "THROTTLED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ConsistencyBarrierTimeout => "CONSISTENCY_BARRIER_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::NotFound => "NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::Conflict => "CONFLICT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::Configuration => "CONFIGURATION",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

/// Terminal client error.
///
/// `status` is `0` for failures raised before any request could be answered
/// (cancellation, configuration).
#[derive(Debug, Clone, Error)]
#[error("{message} (status: {status}, sub-status: {sub_status})")]
pub struct CosmosError {
    pub kind: ErrorKind,
    pub status: u16,
    pub sub_status: u32,
    pub message: String,
    /// Text of the failure that caused this one, e.g. the transport error.
    pub source_message: Option<String>,
    pub diagnostics: Option<CosmosDiagnostics>,
}

impl CosmosError {
    pub fn new(kind: ErrorKind, status: u16, sub_status: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            sub_status,
            message: message.into(),
            source_message: None,
            diagnostics: None,
        }
    }

    /// Map a terminal status to its error kind.
    pub fn from_status(status: u16, sub_status: u32, message: impl Into<String>) -> Self {
        let kind = match (status, sub_status) {
            (status::TOO_MANY_REQUESTS, _) => ErrorKind::Throttled,
            (status::NOT_FOUND, sub_status::READ_SESSION_NOT_AVAILABLE) => ErrorKind::SessionNotFound,
            (status::NOT_FOUND, _) => ErrorKind::NotFound,
            (status::SERVICE_UNAVAILABLE, _) => ErrorKind::ServiceUnavailable,
            (status::REQUEST_TIMEOUT, _) => ErrorKind::Timeout,
            (status::PRECONDITION_FAILED, _) => ErrorKind::PreconditionFailed,
            (status::CONFLICT, _) => ErrorKind::Conflict,
            (status::BAD_REQUEST, _) => ErrorKind::BadRequest,
            (status::FORBIDDEN, _) => ErrorKind::Forbidden,
            _ => ErrorKind::Unexpected,
        };
        Self::new(kind, status, sub_status, message)
    }

    pub fn throttled(sub_status: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, status::TOO_MANY_REQUESTS, sub_status, message)
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SessionNotFound,
            status::NOT_FOUND,
            sub_status::READ_SESSION_NOT_AVAILABLE,
            message,
        )
    }

    pub fn service_unavailable(sub_status: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, status::SERVICE_UNAVAILABLE, sub_status, message)
    }

    pub fn barrier_timeout(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ConsistencyBarrierTimeout,
            status::SERVICE_UNAVAILABLE,
            sub_status::CLIENT_BARRIER_TIMEOUT,
            message,
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, 0, 0, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, status::REQUEST_TIMEOUT, 0, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, status::BAD_REQUEST, 0, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, 0, 0, message)
    }

    pub fn with_source(mut self, source: impl ToString) -> Self {
        self.source_message = Some(source.to_string());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: CosmosDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    /// Raised by the client itself rather than returned by the service.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Cancelled | ErrorKind::Timeout | ErrorKind::Configuration
        )
    }
}

impl From<RoutingError> for CosmosError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::RangeNotFound { .. } => Self::new(
                ErrorKind::ServiceUnavailable,
                status::SERVICE_UNAVAILABLE,
                sub_status::PARTITION_KEY_RANGE_GONE,
                e.to_string(),
            ),
            _ => Self::service_unavailable(sub_status::UNKNOWN, e.to_string()),
        }
    }
}
