//! Routing Errors

use thiserror::Error;

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Failures raised while resolving a logical target to physical replicas.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// No range covers the requested key or the named range no longer exists
    #[error("partition key range {range} not found in {container}")]
    RangeNotFound { container: String, range: String },

    /// Ranges returned by the address source do not tile the key space
    #[error("routing map for {0} is incomplete")]
    IncompleteRoutingMap(String),

    /// The address source returned no replica for a range in a region
    #[error("no replica addresses for range {range} of {container} in {region}")]
    NoAddresses {
        container: String,
        range: String,
        region: String,
    },

    /// The address source itself failed
    #[error("address source failure: {0}")]
    Source(String),
}

impl RoutingError {
    /// Range-level failures that a routing map refresh may heal.
    pub fn is_stale_routing(&self) -> bool {
        matches!(self, Self::RangeNotFound { .. })
    }
}
