//! Per-operation request options.

use std::time::Duration;

use crate::availability::AvailabilityStrategy;
use crate::routing::Region;

use super::kinds::{ConsistencyLevel, PriorityLevel};

/// Options a caller may set on a single operation.
///
/// Every field is optional; unset fields fall back to the client configuration
/// or the account defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Consistency override. Must not be stronger than the account default.
    pub consistency_level: Option<ConsistencyLevel>,

    /// Throughput priority hint forwarded to the service.
    pub priority_level: Option<PriorityLevel>,

    /// Whether write responses carry the resource body (default: true).
    pub content_response_on_write: Option<bool>,

    /// Ask the service for a minimal response body.
    pub minimal_response: bool,

    /// Availability strategy override for this operation only.
    pub availability_strategy: Option<AvailabilityStrategy>,

    /// Regions this operation must not be routed to.
    pub excluded_regions: Vec<Region>,

    /// Explicit session token; takes precedence over the client's session store.
    pub session_token: Option<String>,

    /// ETag precondition for conditional writes.
    pub if_match: Option<String>,

    /// End-to-end budget covering every retry, hedge and barrier poll.
    pub end_to_end_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = Some(level);
        self
    }

    pub fn with_priority_level(mut self, priority: PriorityLevel) -> Self {
        self.priority_level = Some(priority);
        self
    }

    pub fn with_content_response_on_write(mut self, enabled: bool) -> Self {
        self.content_response_on_write = Some(enabled);
        self
    }

    pub fn with_minimal_response(mut self) -> Self {
        self.minimal_response = true;
        self
    }

    pub fn with_availability_strategy(mut self, strategy: AvailabilityStrategy) -> Self {
        self.availability_strategy = Some(strategy);
        self
    }

    pub fn with_excluded_regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        self.excluded_regions = regions.into_iter().collect();
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_end_to_end_timeout(mut self, timeout: Duration) -> Self {
        self.end_to_end_timeout = Some(timeout);
        self
    }

    /// Whether write responses keep their payload.
    pub fn returns_content_on_write(&self) -> bool {
        self.content_response_on_write.unwrap_or(true) && !self.minimal_response
    }
}
