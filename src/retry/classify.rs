//! Failure classification.
//!
//! Maps a response status or transport error onto the failure kind the retry
//! policy reasons about. A status-bearing failure classifies the same way
//! whether it arrived as a response or as `TransportError::Server`.

use std::fmt;
use std::time::Duration;

use crate::routing::RoutingError;
use crate::transport::{is_non_transient, status, sub_status, StoreResponse, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    Throttled,
    /// Replica moved or connection failed; addresses are stale.
    Gone,
    /// Range split or migrated; the routing map is stale.
    PartitionRangeGone,
    SessionNotAvailable,
    ServiceUnavailable,
    RequestTimeout,
    WriteForbidden,
    InternalServerError,
    /// Error status that no retry can fix.
    Terminal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "Throttled",
            Self::Gone => "Gone",
            Self::PartitionRangeGone => "PartitionRangeGone",
            Self::SessionNotAvailable => "SessionNotAvailable",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::RequestTimeout => "RequestTimeout",
            Self::WriteForbidden => "WriteForbidden",
            Self::InternalServerError => "InternalServerError",
            Self::Terminal => "Terminal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failed attempt.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    /// `0` for failures without a response.
    pub status: u16,
    pub sub_status: u32,
    pub message: String,
    /// Whether the service may have applied the request.
    pub may_have_committed: bool,
    /// The transport gave up waiting for a response.
    pub transport_timeout: bool,
    pub retry_after: Option<Duration>,
}

fn kind_for_status(status_code: u16, sub_status_code: u32) -> FailureKind {
    match status_code {
        status::TOO_MANY_REQUESTS => FailureKind::Throttled,
        status::GONE => match sub_status_code {
            sub_status::PARTITION_KEY_RANGE_GONE
            | sub_status::COMPLETING_SPLIT
            | sub_status::COMPLETING_PARTITION_MIGRATION => FailureKind::PartitionRangeGone,
            _ => FailureKind::Gone,
        },
        status::RETRY_WITH => FailureKind::Gone,
        status::NOT_FOUND if sub_status_code == sub_status::READ_SESSION_NOT_AVAILABLE => {
            FailureKind::SessionNotAvailable
        }
        status::SERVICE_UNAVAILABLE => FailureKind::ServiceUnavailable,
        status::REQUEST_TIMEOUT => FailureKind::RequestTimeout,
        status::FORBIDDEN => match sub_status_code {
            sub_status::WRITE_FORBIDDEN => FailureKind::WriteForbidden,
            sub_status::DATABASE_ACCOUNT_NOT_FOUND => FailureKind::ServiceUnavailable,
            _ => FailureKind::Terminal,
        },
        status::INTERNAL_SERVER_ERROR => FailureKind::InternalServerError,
        _ => FailureKind::Terminal,
    }
}

/// Classify a response. `None` means the response is final.
pub fn classify_response(response: &StoreResponse) -> Option<Failure> {
    let sub = response.sub_status();
    if is_non_transient(response.status, sub) {
        return None;
    }
    Some(Failure {
        kind: kind_for_status(response.status, sub),
        status: response.status,
        sub_status: sub,
        message: format!("service returned {}/{}", response.status, sub),
        may_have_committed: false,
        transport_timeout: false,
        retry_after: response.headers.retry_after(),
    })
}

pub fn classify_error(error: &TransportError) -> Failure {
    match error {
        TransportError::Server {
            status,
            sub_status,
            headers,
            ..
        } => Failure {
            kind: kind_for_status(*status, *sub_status),
            status: *status,
            sub_status: *sub_status,
            message: error.to_string(),
            may_have_committed: false,
            transport_timeout: false,
            retry_after: headers.retry_after(),
        },
        TransportError::Timeout { .. } => Failure {
            kind: FailureKind::Gone,
            status: 0,
            sub_status: 0,
            message: error.to_string(),
            may_have_committed: error.may_have_committed(),
            transport_timeout: true,
            retry_after: None,
        },
        TransportError::ConnectionBroken { .. } | TransportError::EndpointUnreachable(_) => Failure {
            kind: FailureKind::Gone,
            status: 0,
            sub_status: 0,
            message: error.to_string(),
            may_have_committed: error.may_have_committed(),
            transport_timeout: false,
            retry_after: None,
        },
    }
}

/// Classify a failed address lookup. `None` means the lookup cannot heal.
///
/// A range that is gone after the routing map was reloaded stays gone; every
/// other lookup failure is resent through the gone path with fresh routing.
pub fn classify_routing_error(error: &RoutingError) -> Option<Failure> {
    if error.is_stale_routing() {
        return None;
    }
    Some(Failure {
        kind: FailureKind::Gone,
        status: 0,
        sub_status: 0,
        message: error.to_string(),
        may_have_committed: false,
        transport_timeout: false,
        retry_after: None,
    })
}
