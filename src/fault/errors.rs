//! Fault Injection Errors

use thiserror::Error;

/// Result type for fault injection setup
pub type FaultResult<T> = Result<T, FaultError>;

/// Rejected fault injection rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaultError {
    /// Injection rate outside `(0, 1]`
    #[error("injection rate {0} must be in (0, 1]")]
    InvalidInjectionRate(f64),

    /// A response delay rule needs a delay
    #[error("rule {0} injects a response delay but has no delay set")]
    MissingDelay(String),

    /// A rule with the same id is already registered
    #[error("fault injection rule {0} already exists")]
    DuplicateRule(String),

    /// The rule table lock was poisoned by a panicking writer
    #[error("fault injection rule {0} could not be registered: rule table poisoned")]
    RulesUnavailable(String),
}
