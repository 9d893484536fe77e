//! Write barrier
//!
//! After a write the primary may have committed while the replication
//! watermark the account promises (N-region commit, or global strong) still
//! trails the write's LSN. The coordinator polls the container with HEAD
//! requests until the watermark reaches the LSN or the poll budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::diagnostics::{keys, spans, StoreResponseStatistics, Trace};
use crate::error::{CosmosError, CosmosResult};
use crate::observability::{log_event, ClientMetrics, Event};
use crate::operation::ConsistencyLevel;
use crate::routing::AccountProperties;
use crate::transport::{headers, ConnectionMode, Endpoint, Headers, StoreRequest, Transport};

/// Poll budget and spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierOptions {
    pub max_attempts: u32,
    /// Number of polls after the first one that use `short_interval`.
    pub short_retries: u32,
    pub short_interval: Duration,
    pub long_interval: Duration,
}

impl Default for BarrierOptions {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            short_retries: 4,
            short_interval: Duration::from_millis(10),
            long_interval: Duration::from_millis(30),
        }
    }
}

impl BarrierOptions {
    /// Wait before poll `attempt` (zero-based). The first poll is immediate.
    pub fn interval_before(&self, attempt: u32) -> Duration {
        match attempt {
            0 => Duration::ZERO,
            n if n <= self.short_retries => self.short_interval,
            _ => self.long_interval,
        }
    }
}

/// Which watermark must reach the write LSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierRequirement {
    /// `x-ms-cosmos-global-nregion-committed-glsn >= lsn`
    NRegionCommit { lsn: u64 },
    /// `x-ms-global-Committed-lsn >= lsn`
    GlobalStrong { lsn: u64 },
}

impl BarrierRequirement {
    pub fn lsn(&self) -> u64 {
        match self {
            Self::NRegionCommit { lsn } | Self::GlobalStrong { lsn } => *lsn,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NRegionCommit { .. } => "NRegionCommit",
            Self::GlobalStrong { .. } => "GlobalStrong",
        }
    }

    /// Whether the watermark in `headers` has caught up.
    pub fn is_satisfied_by(&self, headers: &Headers) -> bool {
        let watermark = match self {
            Self::NRegionCommit { .. } => headers.n_region_committed_glsn(),
            Self::GlobalStrong { .. } => headers.global_committed_lsn(),
        };
        watermark.map_or(false, |w| w >= self.lsn())
    }
}

/// Decide whether a write response needs a barrier.
pub fn barrier_requirement(account: &AccountProperties, headers: &Headers) -> Option<BarrierRequirement> {
    let lsn = headers.lsn()?;

    if account.enable_n_region_synchronous_commit {
        if let Some(glsn) = headers.n_region_committed_glsn() {
            if glsn < lsn {
                return Some(BarrierRequirement::NRegionCommit { lsn });
            }
        }
    }

    if account.default_consistency == ConsistencyLevel::Strong
        && headers.number_of_read_regions().unwrap_or(0) > 0
    {
        if let Some(global) = headers.global_committed_lsn() {
            if global < lsn {
                return Some(BarrierRequirement::GlobalStrong { lsn });
            }
        }
    }

    None
}

/// Polls until a write is replicated far enough.
pub struct WriteBarrierCoordinator {
    transport: Arc<dyn Transport>,
    mode: ConnectionMode,
    options: BarrierOptions,
    metrics: Arc<ClientMetrics>,
}

impl WriteBarrierCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        mode: ConnectionMode,
        options: BarrierOptions,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            transport,
            mode,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> &BarrierOptions {
        &self.options
    }

    /// Poll `endpoint` until `requirement` holds. Returns the number of polls.
    pub async fn wait(
        &self,
        requirement: BarrierRequirement,
        endpoint: &Endpoint,
        container: &str,
        range_id: Option<String>,
        trace: &Trace,
        cancel: &CancellationToken,
    ) -> CosmosResult<u32> {
        let span = trace.child(spans::BARRIER);
        span.add_datum("Requirement", requirement.name());
        span.add_datum("LSN", requirement.lsn());
        log_event(Event::BarrierBegin, endpoint.region.as_str(), requirement.name());

        let request = StoreRequest::head_collection(container, range_id);

        for attempt in 0..self.options.max_attempts {
            let interval = self.options.interval_before(attempt);
            if !interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        span.end();
                        return Err(CosmosError::cancelled("operation cancelled during write barrier"));
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            let poll = span.child(spans::BARRIER_REQUEST);
            let started = Instant::now();
            self.metrics.increment_barrier_polls();
            self.metrics.increment_attempts();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    poll.end();
                    span.end();
                    return Err(CosmosError::cancelled("operation cancelled during write barrier"));
                }
                result = self.transport.invoke(endpoint, &request) => result,
            };

            let converged = match result {
                Ok(response) => {
                    poll.record_store_response(
                        StoreResponseStatistics::from_response(
                            &request,
                            self.mode,
                            endpoint.region.as_str(),
                            &endpoint.address,
                            &response,
                        ),
                        started,
                    );
                    response.is_success() && requirement.is_satisfied_by(&response.headers)
                }
                Err(e) => {
                    let (status, sub) = e.status().unwrap_or((0, 0));
                    poll.record_store_response(
                        StoreResponseStatistics::from_failure(
                            &request,
                            self.mode,
                            endpoint.region.as_str(),
                            &endpoint.address,
                            status,
                            sub,
                            e.to_string(),
                        ),
                        started,
                    );
                    false
                }
            };
            poll.end();

            if converged {
                let polls = attempt + 1;
                span.add_datum("Polls", polls);
                span.end();
                log_event(Event::BarrierComplete, endpoint.region.as_str(), "replication caught up");
                return Ok(polls);
            }
        }

        self.metrics.increment_barrier_failures();
        let outcome = format!(
            "write committed at the primary (lsn {}) but {} replication did not converge after {} polls",
            requirement.lsn(),
            requirement.name(),
            self.options.max_attempts
        );
        span.add_datum(keys::BARRIER_OUTCOME, outcome.clone());
        span.end();
        log_event(Event::BarrierFailed, endpoint.region.as_str(), &outcome);
        Err(CosmosError::barrier_timeout(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Region;
    use crate::transport::{StoreResponse, TransportError};
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Reports an N-region watermark that advances by `step` per HEAD.
    struct AdvancingTransport {
        watermark: AtomicU64,
        step: u64,
    }

    impl Transport for AdvancingTransport {
        fn invoke<'a>(
            &'a self,
            _endpoint: &'a Endpoint,
            _request: &'a StoreRequest,
        ) -> BoxFuture<'a, Result<StoreResponse, TransportError>> {
            let current = self.watermark.fetch_add(self.step, Ordering::SeqCst) + self.step;
            Box::pin(async move {
                Ok(StoreResponse::new(200)
                    .with_header(headers::GLOBAL_N_REGION_COMMITTED_GLSN, current.to_string())
                    .with_header(headers::GLOBAL_COMMITTED_LSN, current.to_string()))
            })
        }
    }

    fn coordinator(start: u64, step: u64, options: BarrierOptions) -> WriteBarrierCoordinator {
        WriteBarrierCoordinator::new(
            Arc::new(AdvancingTransport {
                watermark: AtomicU64::new(start),
                step,
            }),
            ConnectionMode::Direct,
            options,
            Arc::new(ClientMetrics::new()),
        )
    }

    fn endpoint() -> Endpoint {
        Endpoint::new(Region::from("West US"), "rntbd://west/0")
    }

    fn write_headers(lsn: u64, glsn: u64) -> Headers {
        Headers::new()
            .with(headers::LSN, lsn.to_string())
            .with(headers::GLOBAL_N_REGION_COMMITTED_GLSN, glsn.to_string())
            .with(headers::GLOBAL_COMMITTED_LSN, glsn.to_string())
            .with(headers::NUMBER_OF_READ_REGIONS, "2")
    }

    #[test]
    fn test_intervals() {
        let options = BarrierOptions::default();
        assert_eq!(options.interval_before(0), Duration::ZERO);
        assert_eq!(options.interval_before(1), Duration::from_millis(10));
        assert_eq!(options.interval_before(4), Duration::from_millis(10));
        assert_eq!(options.interval_before(5), Duration::from_millis(30));
    }

    #[test]
    fn test_requirement_detection() {
        let n_region = AccountProperties::single_master("A", &["B"]).with_n_region_synchronous_commit(true);
        assert_eq!(
            barrier_requirement(&n_region, &write_headers(100, 90)),
            Some(BarrierRequirement::NRegionCommit { lsn: 100 })
        );
        assert_eq!(barrier_requirement(&n_region, &write_headers(100, 100)), None);

        let strong = AccountProperties::single_master("A", &["B"])
            .with_default_consistency(ConsistencyLevel::Strong);
        assert_eq!(
            barrier_requirement(&strong, &write_headers(100, 90)),
            Some(BarrierRequirement::GlobalStrong { lsn: 100 })
        );

        let session = AccountProperties::single_master("A", &["B"]);
        assert_eq!(barrier_requirement(&session, &write_headers(100, 90)), None);
    }

    #[tokio::test]
    async fn test_converges_after_exact_number_of_polls() {
        let coordinator = coordinator(90, 2, BarrierOptions::default());
        let trace = Trace::root("CreateDocument");
        let polls = coordinator
            .wait(
                BarrierRequirement::NRegionCommit { lsn: 100 },
                &endpoint(),
                "c",
                None,
                &trace,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(polls, 5);
        assert_eq!(trace.find(spans::BARRIER_REQUEST).len(), 5);
        assert_eq!(
            trace
                .all_store_responses()
                .iter()
                .filter(|s| s.is_head_collection())
                .count(),
            5
        );
    }

    #[tokio::test]
    async fn test_non_convergence_is_503() {
        let options = BarrierOptions {
            max_attempts: 3,
            short_interval: Duration::from_millis(1),
            long_interval: Duration::from_millis(1),
            ..BarrierOptions::default()
        };
        let coordinator = coordinator(50, 0, options);
        let trace = Trace::root("CreateDocument");
        let err = coordinator
            .wait(
                BarrierRequirement::GlobalStrong { lsn: 100 },
                &endpoint(),
                "c",
                None,
                &trace,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 503);
        assert_eq!(trace.find(spans::BARRIER_REQUEST).len(), 3);
        assert!(!trace.find_data(keys::BARRIER_OUTCOME).is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let coordinator = coordinator(0, 0, BarrierOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coordinator
            .wait(
                BarrierRequirement::NRegionCommit { lsn: 100 },
                &endpoint(),
                "c",
                None,
                &Trace::root("op"),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
    }
}
