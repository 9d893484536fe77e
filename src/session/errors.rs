//! Session Errors

use thiserror::Error;

/// Result type for session token handling
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Token text does not follow the vector or simple form
    #[error("malformed session token: {0}")]
    Malformed(String),

    /// Composite token entry without a partition key range prefix
    #[error("session token entry {0} has no partition key range")]
    MissingRange(String),
}
