//! Request executor
//!
//! Last stage of the pipeline. Turns one logical operation into network
//! attempts:
//!
//! ```text
//! regions ─► [hedging] ─► racer: resolve ─► session ─► invoke ─► classify
//!                              ▲                                    │
//!                              └──────────── retry decision ◄───────┘
//!                                                         final write ─► barrier
//! ```
//!
//! Each racer owns its `RetryContext`. Shared state (session store, resolver
//! cache, location cache, metrics) is owned by the client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::availability::{execute_hedged, AvailabilityStrategy, FailedRegions, RacerStart};
use crate::consistency::{
    barrier_requirement, read_mode, QuorumOptions, QuorumReader, ReadMode, WriteBarrierCoordinator,
};
use crate::diagnostics::{keys, spans, StoreResponseStatistics, Trace};
use crate::error::{CosmosError, CosmosResult};
use crate::observability::{log_event, ClientMetrics, Event};
use crate::operation::{ConsistencyLevel, LogicalOperation, RequestOptions};
use crate::retry::{
    classify_error, classify_response, classify_routing_error, AttemptInfo, FailureKind, RetryContext, RetryDecision,
    RetryPolicy, RetryTarget,
};
use crate::routing::{
    AccountProperties, AddressResolver, LocationCache, RefreshScope, Region, ResolvedAddress,
};
use crate::session::SessionTokenStore;
use crate::transport::{
    headers, sub_status, Endpoint, Headers, StoreRequest, StoreResponse, Transport, TransportError,
};

use super::context::RequestContext;
use super::pipeline::{OperationExecutor, OperationResult};
use super::response::OperationResponse;

/// Final response produced by one racer.
struct RacerOutcome {
    response: StoreResponse,
    region: Region,
}

/// Per-operation inputs shared by every racer.
struct Plan<'a> {
    op: &'a LogicalOperation,
    options: &'a RequestOptions,
    account: AccountProperties,
    regions: Vec<Region>,
    failed: FailedRegions,
    exclude_failed: bool,
    activity_id: String,
}

pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    resolver: Arc<AddressResolver>,
    locations: Arc<LocationCache>,
    sessions: Arc<SessionTokenStore>,
    policy: RetryPolicy,
    barrier: WriteBarrierCoordinator,
    quorum: QuorumReader,
    strategy: AvailabilityStrategy,
    metrics: Arc<ClientMetrics>,
}

impl RequestExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<AddressResolver>,
        locations: Arc<LocationCache>,
        sessions: Arc<SessionTokenStore>,
        policy: RetryPolicy,
        barrier: WriteBarrierCoordinator,
        strategy: AvailabilityStrategy,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        let quorum = QuorumReader::new(transport.clone(), resolver.connection_mode(), QuorumOptions::default());
        Self {
            transport,
            resolver,
            locations,
            sessions,
            policy,
            barrier,
            quorum,
            strategy,
            metrics,
        }
    }

    async fn run(&self, op: &LogicalOperation, ctx: &RequestContext) -> OperationResult {
        let account = self.locations.account_properties();
        if let Some(level) = ctx.options.consistency_level {
            if !level.is_valid_override_of(account.default_consistency) {
                return Err(CosmosError::bad_request(format!(
                    "consistency level {} is stronger than the account default {}",
                    level.as_str(),
                    account.default_consistency.as_str()
                )));
            }
        }

        let regions = self
            .locations
            .applicable_regions(op.is_read_only(), &ctx.options.excluded_regions);
        if regions.is_empty() {
            return Err(CosmosError::configuration("account has no regions for this operation"));
        }
        if !ctx.options.excluded_regions.is_empty() {
            ctx.trace.add_datum(
                "Request Excluded Regions",
                Value::from(
                    ctx.options
                        .excluded_regions
                        .iter()
                        .map(|r| r.as_str())
                        .collect::<Vec<_>>(),
                ),
            );
        }

        let strategy = ctx.options.availability_strategy.unwrap_or(self.strategy);
        let hedging = strategy.hedging_for(op, regions.len());
        let plan = Plan {
            op,
            options: &ctx.options,
            account,
            exclude_failed: hedging.map_or(false, |h| h.exclude_regions_with_failures),
            regions,
            failed: FailedRegions::new(),
            activity_id: ctx.activity_id.to_string(),
        };

        let outcome = match hedging {
            Some(config) => {
                let plan = &plan;
                execute_hedged(
                    config,
                    &plan.regions,
                    &plan.failed,
                    &ctx.trace,
                    &ctx.cancel,
                    &self.metrics,
                    |start| self.racer(plan, start),
                )
                .await
            }
            None => {
                self.race(&plan, 0, ctx.trace.clone(), ctx.cancel.child_token())
                    .await
            }
        };

        match outcome {
            Ok(outcome) => Ok(self.build_response(op, ctx, outcome)),
            Err(e) => Err(e.with_diagnostics(ctx.diagnostics())),
        }
    }

    fn build_response(
        &self,
        op: &LogicalOperation,
        ctx: &RequestContext,
        outcome: RacerOutcome,
    ) -> OperationResponse {
        let diagnostics = ctx.diagnostics();
        let response = outcome.response;
        let payload = if op.is_write() && !ctx.options.returns_content_on_write() {
            None
        } else {
            response.payload
        };
        OperationResponse {
            status: response.status,
            sub_status: response
                .headers
                .sub_status()
                .unwrap_or(sub_status::UNKNOWN),
            session_token: response.headers.session_token().map(str::to_string),
            request_charge: diagnostics.summary().request_charge,
            headers: response.headers,
            payload,
            region: Some(outcome.region),
            diagnostics,
        }
    }

    fn racer<'a>(&'a self, plan: &'a Plan<'a>, start: RacerStart) -> BoxFuture<'a, CosmosResult<RacerOutcome>> {
        Box::pin(self.race(plan, start.region_pos, start.trace, start.cancel))
    }

    /// One racer: the full retry loop starting at `regions[start_pos]`.
    async fn race(
        &self,
        plan: &Plan<'_>,
        start_pos: usize,
        trace: Trace,
        cancel: CancellationToken,
    ) -> CosmosResult<RacerOutcome> {
        let op = plan.op;
        let mut retry = RetryContext::new();
        retry.explicit_session_token = plan.options.session_token.is_some();

        let mut pos = start_pos;
        let mut refresh = RefreshScope::None;
        let mut replica_attempt = 0usize;

        let result = loop {
            let region = plan.regions[pos].clone();
            retry.enter_region(&region);

            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(cancelled()),
                resolved = self.resolver.resolve(&op.container, &op.target, &region, refresh) => resolved,
            };
            refresh = RefreshScope::None;

            let failure = match resolved {
                Err(e) => match classify_routing_error(&e) {
                    Some(failure) => {
                        let lookup = trace.child(spans::ADDRESS_RESOLUTION);
                        lookup.add_datum("Region", region.as_str());
                        lookup.add_datum("Error", e.to_string());
                        lookup.end();
                        failure
                    }
                    None => break Err(CosmosError::from(e)),
                },
                Ok(resolved) => {
                    let mode = self.read_mode(plan);
                    let endpoint = match mode {
                        ReadMode::Any => resolved.replica(replica_attempt).clone(),
                        _ => resolved.primary().clone(),
                    };
                    let request = self.build_request(plan, resolved.range_id.clone(), &retry);
                    let attempt = trace.child(spans::ATTEMPT);
                    attempt.add_datum("Region", region.as_str());
                    if op.is_read_only() {
                        attempt.add_datum("Read Mode", mode.as_str());
                    }

                    let started = Instant::now();
                    self.metrics.increment_attempts();
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            attempt.end();
                            break Err(cancelled());
                        }
                        result = self.dispatch(plan, mode, &resolved, &endpoint, &request, &attempt) => result,
                    };

                    match result {
                        Ok(response) => {
                            if !mode.is_quorum() {
                                self.record_response(&attempt, &request, &endpoint, &response, started);
                            }
                            self.merge_session(op, resolved.range_id.as_deref(), &response.headers);
                            attempt.end();
                            match classify_response(&response) {
                                None => {
                                    if op.is_write() {
                                        let barrier = self
                                            .await_barrier(plan, &response, &endpoint, resolved.range_id, &trace, &cancel)
                                            .await;
                                        if let Err(e) = barrier {
                                            break Err(e);
                                        }
                                    }
                                    break Ok(RacerOutcome { response, region });
                                }
                                Some(failure) => failure,
                            }
                        }
                        Err(e) => {
                            if !mode.is_quorum() {
                                self.record_error(&attempt, &request, &endpoint, &e, started);
                            }
                            if let Some(headers) = e.headers() {
                                self.merge_session(op, resolved.range_id.as_deref(), headers);
                            }
                            attempt.end();
                            if let TransportError::EndpointUnreachable(_) = e {
                                self.mark_unavailable(&region, op.is_read_only(), "endpoint unreachable");
                            }
                            classify_error(&e)
                        }
                    }
                }
            };

            if plan.exclude_failed {
                plan.failed.insert(&region);
            }
            if failure.kind == FailureKind::WriteForbidden {
                self.mark_unavailable(&region, false, "write forbidden");
            }

            let info = AttemptInfo {
                is_read: op.is_read_only(),
                is_idempotent: op.is_idempotent(plan.options),
                has_alternate_region: next_region_pos(plan, pos).is_some(),
            };
            match self.policy.on_failure(&mut retry, &failure, info) {
                RetryDecision::Fail(e) => break Err(e),
                RetryDecision::Retry { delay, target } => {
                    self.metrics.increment_retries(failure.kind);
                    debug!(
                        activity_id = %plan.activity_id,
                        region = %region,
                        failure = failure.kind.as_str(),
                        target = target.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying attempt"
                    );
                    log_event(
                        Event::AttemptRetry,
                        &plan.activity_id,
                        &format!("{} in {}", failure.kind, region),
                    );

                    match target {
                        RetryTarget::SameEndpoint => {}
                        RetryTarget::NextReplica => replica_attempt += 1,
                        RetryTarget::RefreshAddresses => {
                            refresh = RefreshScope::Addresses;
                            replica_attempt += 1;
                        }
                        RetryTarget::RefreshRoutingMap => refresh = RefreshScope::RoutingMap,
                        RetryTarget::NextRegion => {
                            if let Some(next) = next_region_pos(plan, pos) {
                                self.metrics.increment_region_failovers();
                                log_event(
                                    Event::RegionFailover,
                                    plan.regions[next].as_str(),
                                    &format!("failing over from {} after {}", region, failure.kind),
                                );
                                pos = next;
                            }
                            replica_attempt = 0;
                        }
                        RetryTarget::LocalSessionToken => replica_attempt = 0,
                    }

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break Err(cancelled()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        };

        if !retry.decisions().is_empty() {
            trace.add_datum(keys::RETRY_DECISIONS, Value::from(retry.decisions().to_vec()));
        }
        trace.add_datum(
            "Regions Tried",
            Value::from(retry.regions_tried.iter().map(|r| r.as_str()).collect::<Vec<_>>()),
        );
        result
    }

    /// Replica selection for this operation. Writes always go to the primary.
    fn read_mode(&self, plan: &Plan<'_>) -> ReadMode {
        if plan.op.is_write() {
            return ReadMode::Primary;
        }
        let consistency = plan
            .options
            .consistency_level
            .unwrap_or(plan.account.default_consistency);
        read_mode(plan.op, consistency, self.resolver.connection_mode())
    }

    /// Send one attempt. Quorum reads fan out and record their own replica requests.
    async fn dispatch(
        &self,
        plan: &Plan<'_>,
        mode: ReadMode,
        resolved: &ResolvedAddress,
        endpoint: &Endpoint,
        request: &StoreRequest,
        attempt: &Trace,
    ) -> Result<StoreResponse, TransportError> {
        if !mode.is_quorum() {
            return self.transport.invoke(endpoint, request).await;
        }
        let global_strong = plan.account.default_consistency == ConsistencyLevel::Strong
            && plan
                .options
                .consistency_level
                .map_or(true, |level| level == ConsistencyLevel::Strong);
        self.quorum
            .read(resolved, request, mode, global_strong, attempt)
            .await
    }

    fn build_request(&self, plan: &Plan<'_>, range_id: Option<String>, retry: &RetryContext) -> StoreRequest {
        let op = plan.op;
        let options = plan.options;
        let mut request = StoreRequest::from_operation(op, range_id.clone());
        let h = &mut request.headers;

        h.insert(headers::ACTIVITY_ID, plan.activity_id.as_str());
        if let Some(ref range) = range_id {
            h.insert(headers::PARTITION_KEY_RANGE_ID, range.as_str());
        }
        if let Some(ref key) = request.partition_key {
            h.insert(headers::PARTITION_KEY, key.to_header_value());
        }
        if let Some(level) = options.consistency_level {
            h.insert(headers::CONSISTENCY_LEVEL, level.as_str());
        }
        if let Some(priority) = options.priority_level {
            h.insert(headers::PRIORITY_LEVEL, priority.as_str());
        }
        if op.is_write() && (options.minimal_response || !options.returns_content_on_write()) {
            h.insert(headers::PREFER, headers::PREFER_RETURN_MINIMAL);
        }
        if let Some(ref etag) = options.if_match {
            h.insert(headers::IF_MATCH, etag.as_str());
        }
        if let Some(ref continuation) = op.continuation {
            h.insert(headers::CONTINUATION, continuation.as_str());
        }

        let consistency = options
            .consistency_level
            .unwrap_or(plan.account.default_consistency);
        let wants_session = consistency == ConsistencyLevel::Session
            && (op.is_read_only() || plan.account.enable_multiple_write_locations);
        if wants_session {
            let token = match options.session_token {
                Some(ref explicit) if !retry.used_local_session_token => Some(explicit.clone()),
                _ => match range_id {
                    Some(ref range) => self.sessions.header_for_range(&op.container, range),
                    None => self.sessions.container_token(&op.container),
                },
            };
            if let Some(token) = token {
                h.insert(headers::SESSION_TOKEN, token);
            }
        }

        request
    }

    fn merge_session(&self, op: &LogicalOperation, range_id: Option<&str>, headers: &Headers) {
        if let Some(token) = headers.session_token() {
            // Malformed tokens are logged by the store and otherwise ignored.
            let _ = self.sessions.merge_from_header(&op.container, range_id, token);
        }
    }

    fn record_response(
        &self,
        span: &Trace,
        request: &StoreRequest,
        endpoint: &Endpoint,
        response: &StoreResponse,
        started: Instant,
    ) {
        span.record_store_response(
            StoreResponseStatistics::from_response(
                request,
                self.resolver.connection_mode(),
                endpoint.region.as_str(),
                &endpoint.address,
                response,
            ),
            started,
        );
    }

    fn record_error(
        &self,
        span: &Trace,
        request: &StoreRequest,
        endpoint: &Endpoint,
        error: &TransportError,
        started: Instant,
    ) {
        let (status, sub) = error.status().unwrap_or((0, 0));
        span.record_store_response(
            StoreResponseStatistics::from_failure(
                request,
                self.resolver.connection_mode(),
                endpoint.region.as_str(),
                &endpoint.address,
                status,
                sub,
                error.to_string(),
            ),
            started,
        );
    }

    fn mark_unavailable(&self, region: &Region, for_read: bool, reason: &str) {
        if for_read {
            self.locations.mark_unavailable_for_read(region);
        } else {
            self.locations.mark_unavailable_for_write(region);
        }
        log_event(Event::RegionMarkedUnavailable, region.as_str(), reason);
    }

    async fn await_barrier(
        &self,
        plan: &Plan<'_>,
        response: &StoreResponse,
        endpoint: &Endpoint,
        range_id: Option<String>,
        trace: &Trace,
        cancel: &CancellationToken,
    ) -> CosmosResult<()> {
        let requirement = match barrier_requirement(&plan.account, &response.headers) {
            Some(requirement) => requirement,
            None => return Ok(()),
        };
        self.barrier
            .wait(requirement, endpoint, &plan.op.container, range_id, trace, cancel)
            .await
            .map(|_| ())
    }
}

impl OperationExecutor for RequestExecutor {
    fn execute<'a>(
        &'a self,
        op: &'a LogicalOperation,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(self.run(op, ctx))
    }
}

/// Next region after `current`, wrapping around, skipping failed regions when
/// exclusion is on.
fn next_region_pos(plan: &Plan<'_>, current: usize) -> Option<usize> {
    let len = plan.regions.len();
    (1..len)
        .map(|step| (current + step) % len)
        .find(|&pos| !(plan.exclude_failed && plan.failed.contains(&plan.regions[pos])))
}

fn cancelled() -> CosmosError {
    CosmosError::cancelled("operation cancelled")
}
