//! Fault injection rules
//!
//! A rule pairs a condition (which requests) with a result (what to inject)
//! and a lifecycle (when, how often).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::operation::{OperationType, ResourceType};
use crate::routing::Region;
use crate::transport::{headers, status, sub_status, Endpoint, StoreRequest, StoreResponse, TransportError};

use super::errors::{FaultError, FaultResult};

/// Server-side failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultErrorType {
    Gone,
    RetryWith,
    TooManyRequests,
    Timeout,
    InternalServerError,
    ReadSessionNotAvailable,
    PartitionIsMigrating,
    PartitionIsSplitting,
    ServiceUnavailable,
    DatabaseAccountNotFound,
    LeaseNotFound,
    WriteForbidden,
    /// Delay the real response
    ResponseDelay,
    /// Channel breaks before the request is sent
    ConnectionBroken,
    /// Transport gives up after the request was sent
    TransportTimeout,
}

impl FaultErrorType {
    /// Status and sub-status the fault is reported with.
    pub fn status(&self) -> Option<(u16, u32)> {
        let pair = match self {
            Self::Gone => (status::GONE, sub_status::SERVER_GENERATED_410),
            Self::RetryWith => (status::RETRY_WITH, sub_status::UNKNOWN),
            Self::TooManyRequests => (status::TOO_MANY_REQUESTS, sub_status::RU_BUDGET_EXCEEDED),
            Self::Timeout => (status::REQUEST_TIMEOUT, sub_status::UNKNOWN),
            Self::InternalServerError => (status::INTERNAL_SERVER_ERROR, sub_status::UNKNOWN),
            Self::ReadSessionNotAvailable => (status::NOT_FOUND, sub_status::READ_SESSION_NOT_AVAILABLE),
            Self::PartitionIsMigrating => (status::GONE, sub_status::COMPLETING_PARTITION_MIGRATION),
            Self::PartitionIsSplitting => (status::GONE, sub_status::COMPLETING_SPLIT),
            Self::ServiceUnavailable => (status::SERVICE_UNAVAILABLE, sub_status::UNKNOWN),
            Self::DatabaseAccountNotFound => (status::FORBIDDEN, sub_status::DATABASE_ACCOUNT_NOT_FOUND),
            Self::LeaseNotFound => (status::GONE, sub_status::LEASE_NOT_FOUND),
            Self::WriteForbidden => (status::FORBIDDEN, sub_status::WRITE_FORBIDDEN),
            Self::ResponseDelay | Self::ConnectionBroken | Self::TransportTimeout => return None,
        };
        Some(pair)
    }
}

/// How a status-bearing fault reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultSignal {
    /// As a response carrying the error status
    #[default]
    Status,
    /// As `TransportError::Server`
    Exception,
}

/// Which requests a rule applies to. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct FaultCondition {
    pub region: Option<Region>,
    pub operation_type: Option<OperationType>,
    pub resource_type: Option<ResourceType>,
    pub container: Option<String>,
}

impl FaultCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn matches(&self, endpoint: &Endpoint, request: &StoreRequest) -> bool {
        self.region.as_ref().map_or(true, |r| *r == endpoint.region)
            && self.operation_type.map_or(true, |o| o == request.operation_type)
            && self.resource_type.map_or(true, |r| r == request.resource_type)
            && self.container.as_ref().map_or(true, |c| *c == request.container)
    }
}

/// What a rule injects.
#[derive(Debug, Clone)]
pub struct ServerErrorResult {
    pub error_type: FaultErrorType,
    /// Wait before answering; required for `ResponseDelay`.
    pub delay: Option<Duration>,
    /// Fraction of matching requests to hit, in `(0, 1]`.
    pub injection_rate: f64,
    pub signal: FaultSignal,
    /// Sent as `x-ms-retry-after-ms` on throttling faults.
    pub retry_after: Option<Duration>,
}

impl ServerErrorResult {
    pub fn new(error_type: FaultErrorType) -> Self {
        Self {
            error_type,
            delay: None,
            injection_rate: 1.0,
            signal: FaultSignal::Status,
            retry_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_injection_rate(mut self, rate: f64) -> Self {
        self.injection_rate = rate;
        self
    }

    pub fn with_signal(mut self, signal: FaultSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// The injected failure, or `None` for a pure delay.
    pub fn to_failure(&self, endpoint: &Endpoint, rule_id: &str) -> Option<Result<StoreResponse, TransportError>> {
        match self.error_type {
            FaultErrorType::ResponseDelay => return None,
            FaultErrorType::ConnectionBroken => {
                return Some(Err(TransportError::ConnectionBroken {
                    endpoint: endpoint.address.clone(),
                    reason: format!("connection reset by fault injection rule {}", rule_id),
                    request_sent: false,
                }))
            }
            FaultErrorType::TransportTimeout => {
                return Some(Err(TransportError::Timeout {
                    endpoint: endpoint.address.clone(),
                    request_sent: true,
                }))
            }
            _ => {}
        }

        let (status_code, sub) = self.error_type.status()?;
        let mut response_headers = crate::transport::Headers::new();
        response_headers.insert(headers::SUB_STATUS, sub.to_string());
        if let Some(retry_after) = self.retry_after {
            response_headers.insert(headers::RETRY_AFTER_MS, retry_after.as_millis().to_string());
        }

        Some(match self.signal {
            FaultSignal::Status => Ok(StoreResponse {
                status: status_code,
                headers: response_headers,
                payload: None,
            }),
            FaultSignal::Exception => Err(TransportError::Server {
                status: status_code,
                sub_status: sub,
                message: format!("{:?} injected by rule {}", self.error_type, rule_id),
                headers: response_headers,
            }),
        })
    }
}

/// A registered fault with its lifecycle.
#[derive(Debug)]
pub struct FaultInjectionRule {
    id: String,
    condition: FaultCondition,
    result: ServerErrorResult,
    /// Active window measured from `start_delay`
    duration: Option<Duration>,
    hit_limit: Option<u64>,
    start_delay: Duration,
    created_at: Instant,
    enabled: AtomicBool,
    hit_count: AtomicU64,
}

impl FaultInjectionRule {
    pub fn new(id: impl Into<String>, condition: FaultCondition, result: ServerErrorResult) -> FaultResult<Self> {
        let id = id.into();
        if !(result.injection_rate > 0.0 && result.injection_rate <= 1.0) {
            return Err(FaultError::InvalidInjectionRate(result.injection_rate));
        }
        if result.error_type == FaultErrorType::ResponseDelay && result.delay.is_none() {
            return Err(FaultError::MissingDelay(id));
        }
        Ok(Self {
            id,
            condition,
            result,
            duration: None,
            hit_limit: None,
            start_delay: Duration::ZERO,
            created_at: Instant::now(),
            enabled: AtomicBool::new(true),
            hit_count: AtomicU64::new(0),
        })
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_hit_limit(mut self, limit: u64) -> Self {
        self.hit_limit = Some(limit);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn result(&self) -> &ServerErrorResult {
        &self.result
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        let age = self.created_at.elapsed();
        if age < self.start_delay {
            return false;
        }
        self.duration.map_or(true, |d| age - self.start_delay < d)
    }

    /// Decide whether this request is hit, counting the hit if so.
    pub fn try_hit(&self, endpoint: &Endpoint, request: &StoreRequest) -> bool {
        if !self.is_enabled() || !self.is_active() || !self.condition.matches(endpoint, request) {
            return false;
        }
        if self.result.injection_rate < 1.0 && rand::thread_rng().gen::<f64>() >= self.result.injection_rate {
            return false;
        }
        let limit = self.hit_limit;
        self.hit_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |hits| match limit {
                Some(limit) if hits >= limit => None,
                _ => Some(hits + 1),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(region: &str) -> Endpoint {
        Endpoint::new(Region::from(region), format!("rntbd://{}/replica-0", region))
    }

    fn read_request() -> StoreRequest {
        StoreRequest::head_collection("orders", None)
    }

    #[test]
    fn test_condition_filters_region() {
        let condition = FaultCondition::new().region("A").container("orders");
        assert!(condition.matches(&endpoint("A"), &read_request()));
        assert!(!condition.matches(&endpoint("B"), &read_request()));
    }

    #[test]
    fn test_hit_limit() {
        let rule = FaultInjectionRule::new(
            "gone-once",
            FaultCondition::new(),
            ServerErrorResult::new(FaultErrorType::Gone),
        )
        .unwrap()
        .with_hit_limit(1);

        assert!(rule.try_hit(&endpoint("A"), &read_request()));
        assert!(!rule.try_hit(&endpoint("A"), &read_request()));
        assert_eq!(rule.hit_count(), 1);
    }

    #[test]
    fn test_disable_and_enable() {
        let rule = FaultInjectionRule::new(
            "toggle",
            FaultCondition::new(),
            ServerErrorResult::new(FaultErrorType::TooManyRequests),
        )
        .unwrap();
        rule.disable();
        assert!(!rule.try_hit(&endpoint("A"), &read_request()));
        rule.enable();
        assert!(rule.try_hit(&endpoint("A"), &read_request()));
    }

    #[test]
    fn test_start_delay_defers_rule() {
        let rule = FaultInjectionRule::new(
            "later",
            FaultCondition::new(),
            ServerErrorResult::new(FaultErrorType::Gone),
        )
        .unwrap()
        .with_start_delay(Duration::from_secs(60));
        assert!(!rule.try_hit(&endpoint("A"), &read_request()));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let err = FaultInjectionRule::new(
            "bad-rate",
            FaultCondition::new(),
            ServerErrorResult::new(FaultErrorType::Gone).with_injection_rate(0.0),
        )
        .unwrap_err();
        assert_eq!(err, FaultError::InvalidInjectionRate(0.0));

        let err = FaultInjectionRule::new(
            "no-delay",
            FaultCondition::new(),
            ServerErrorResult::new(FaultErrorType::ResponseDelay),
        )
        .unwrap_err();
        assert!(matches!(err, FaultError::MissingDelay(_)));
    }

    #[test]
    fn test_signal_forms_carry_same_status() {
        let as_status = ServerErrorResult::new(FaultErrorType::ReadSessionNotAvailable)
            .to_failure(&endpoint("A"), "r")
            .unwrap()
            .unwrap();
        assert_eq!(as_status.status, 404);
        assert_eq!(as_status.sub_status(), 1002);

        let as_exception = ServerErrorResult::new(FaultErrorType::ReadSessionNotAvailable)
            .with_signal(FaultSignal::Exception)
            .to_failure(&endpoint("A"), "r")
            .unwrap()
            .unwrap_err();
        assert_eq!(as_exception.status(), Some((404, 1002)));
    }
}
