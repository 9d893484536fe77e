//! Client facade
//!
//! Owns the shared state (location cache, resolver cache, session store,
//! metrics) and the execution pipeline. Every public operation builds a
//! `LogicalOperation` and sends it through the pipeline.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::availability::AvailabilityStrategy;
use crate::config::ClientConfig;
use crate::consistency::WriteBarrierCoordinator;
use crate::diagnostics::{CosmosDiagnostics, Trace};
use crate::error::CosmosResult;
use crate::observability::{log_event, ClientMetrics, Event, MetricsSnapshot};
use crate::operation::{LogicalOperation, RequestOptions};
use crate::retry::RetryPolicy;
use crate::routing::{AccountProperties, AddressResolver, AddressSource, LocationCache, PartitionKey};
use crate::session::SessionTokenStore;
use crate::transport::Transport;

use super::context::RequestContext;
use super::executor::RequestExecutor;
use super::middleware::{DeadlineMiddleware, ObserveMiddleware};
use super::pipeline::{OperationResult, Pipeline, PipelineBuilder};
use super::response::OperationResponse;

pub struct CosmosClientBuilder {
    transport: Arc<dyn Transport>,
    address_source: Arc<dyn AddressSource>,
    account: AccountProperties,
    config: ClientConfig,
    strategy: Option<AvailabilityStrategy>,
}

impl CosmosClientBuilder {
    pub fn new(
        transport: Arc<dyn Transport>,
        address_source: Arc<dyn AddressSource>,
        account: AccountProperties,
    ) -> Self {
        Self {
            transport,
            address_source,
            account,
            config: ClientConfig::default(),
            strategy: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_preferred_regions(mut self, regions: &[&str]) -> Self {
        self.config.preferred_regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Overrides the strategy derived from the configuration.
    pub fn with_availability_strategy(mut self, strategy: AvailabilityStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> CosmosResult<CosmosClientCore> {
        let config = self.config;
        config.validate()?;

        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None => config.availability_strategy()?,
        };
        let metrics = Arc::new(ClientMetrics::new());
        let resolver = Arc::new(AddressResolver::new(self.address_source, config.connection_mode));
        let locations = Arc::new(LocationCache::with_ttl(
            config.preferred_regions(),
            self.account,
            config.region_unavailability(),
        ));
        let sessions = Arc::new(SessionTokenStore::new());
        let barrier = WriteBarrierCoordinator::new(
            self.transport.clone(),
            config.connection_mode,
            config.barrier_options(),
            metrics.clone(),
        );

        let executor = RequestExecutor::new(
            self.transport,
            resolver.clone(),
            locations.clone(),
            sessions.clone(),
            RetryPolicy::new(config.retry_options()),
            barrier,
            strategy,
            metrics.clone(),
        );
        let pipeline = PipelineBuilder::new()
            .with(ObserveMiddleware::new(metrics.clone()))
            .with(DeadlineMiddleware::new(config.end_to_end_timeout(), metrics.clone()))
            .build(executor);

        log_event(
            Event::ClientReady,
            config.connection_mode.as_str(),
            &format!("preferred regions {:?}", config.preferred_regions),
        );

        Ok(CosmosClientCore {
            pipeline,
            resolver,
            locations,
            sessions,
            metrics,
            config,
        })
    }
}

pub struct CosmosClientCore {
    pipeline: Pipeline,
    resolver: Arc<AddressResolver>,
    locations: Arc<LocationCache>,
    sessions: Arc<SessionTokenStore>,
    metrics: Arc<ClientMetrics>,
    config: ClientConfig,
}

impl CosmosClientCore {
    pub fn builder(
        transport: Arc<dyn Transport>,
        address_source: Arc<dyn AddressSource>,
        account: AccountProperties,
    ) -> CosmosClientBuilder {
        CosmosClientBuilder::new(transport, address_source, account)
    }

    /// Execute and turn error statuses into `CosmosError`.
    pub async fn execute(&self, op: LogicalOperation, options: RequestOptions) -> OperationResult {
        self.execute_with_cancellation(op, options, &CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancellation(
        &self,
        op: LogicalOperation,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> OperationResult {
        self.dispatch(&op, options, cancel).await?.ensure_success()
    }

    /// Execute and report service failures as status codes.
    ///
    /// Only client-side failures (cancellation, timeout, configuration) are
    /// returned as errors.
    pub async fn execute_stream(&self, op: LogicalOperation, options: RequestOptions) -> OperationResult {
        self.execute_stream_with_cancellation(op, options, &CancellationToken::new())
            .await
    }

    pub async fn execute_stream_with_cancellation(
        &self,
        op: LogicalOperation,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> OperationResult {
        match self.dispatch(&op, options, cancel).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_client_side() => Err(e),
            Err(e) => {
                let diagnostics = e
                    .diagnostics
                    .clone()
                    .unwrap_or_else(|| CosmosDiagnostics::new(Trace::root(op.name())));
                Ok(OperationResponse::from_error(&e, diagnostics))
            }
        }
    }

    async fn dispatch(
        &self,
        op: &LogicalOperation,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let ctx = RequestContext::new(op, options, cancel.clone());
        self.pipeline.execute(op, ctx).await
    }

    pub async fn read_item(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        id: &str,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(LogicalOperation::read_item(container, partition_key.into(), id), options)
            .await
    }

    pub async fn create_item(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        id: &str,
        body: Vec<u8>,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(
            LogicalOperation::create_item(container, partition_key.into(), id, body),
            options,
        )
        .await
    }

    pub async fn upsert_item(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        id: &str,
        body: Vec<u8>,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(
            LogicalOperation::upsert_item(container, partition_key.into(), id, body),
            options,
        )
        .await
    }

    pub async fn replace_item(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        id: &str,
        body: Vec<u8>,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(
            LogicalOperation::replace_item(container, partition_key.into(), id, body),
            options,
        )
        .await
    }

    pub async fn delete_item(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        id: &str,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(LogicalOperation::delete_item(container, partition_key.into(), id), options)
            .await
    }

    pub async fn execute_batch(
        &self,
        container: &str,
        partition_key: impl Into<PartitionKey>,
        body: Vec<u8>,
        options: RequestOptions,
    ) -> OperationResult {
        self.execute(LogicalOperation::batch(container, partition_key.into(), body), options)
            .await
    }

    /// One page of a query against a single partition key range.
    pub async fn query(
        &self,
        container: &str,
        range_id: &str,
        query: &str,
        continuation: Option<&str>,
        options: RequestOptions,
    ) -> OperationResult {
        let mut op = LogicalOperation::query(container, range_id, query.as_bytes().to_vec());
        if let Some(continuation) = continuation {
            op = op.with_continuation(continuation);
        }
        self.execute(op, options).await
    }

    /// Drain a query across every range of the container.
    pub async fn query_all_ranges(
        &self,
        container: &str,
        query: &str,
        options: RequestOptions,
    ) -> CosmosResult<Vec<Value>> {
        let map = self.resolver.routing_map(container).await?;
        let mut documents = Vec::new();
        for range in map.ranges() {
            let mut continuation: Option<String> = None;
            loop {
                let page = self
                    .query(container, &range.id, query, continuation.as_deref(), options.clone())
                    .await?;
                let body: Value = page.json()?;
                if let Some(items) = body.get("Documents").and_then(Value::as_array) {
                    documents.extend(items.iter().cloned());
                }
                continuation = page.continuation().map(str::to_string);
                if continuation.is_none() {
                    break;
                }
            }
        }
        Ok(documents)
    }

    /// Changes on one range since `continuation`; 304 when nothing changed.
    pub async fn read_change_feed(
        &self,
        container: &str,
        range_id: &str,
        continuation: Option<&str>,
        options: RequestOptions,
    ) -> OperationResult {
        let mut op = LogicalOperation::change_feed(container, range_id);
        if let Some(continuation) = continuation {
            op = op.with_continuation(continuation);
        }
        self.execute(op, options).await
    }

    pub async fn read_container(&self, container: &str, options: RequestOptions) -> OperationResult {
        self.execute(LogicalOperation::read_container(container), options)
            .await
    }

    /// Composite session token for every range of the container seen so far.
    pub fn session_token(&self, container: &str) -> Option<String> {
        self.sessions.container_token(container)
    }

    pub fn session_store(&self) -> &SessionTokenStore {
        &self.sessions
    }

    pub fn location_cache(&self) -> &LocationCache {
        &self.locations
    }

    /// Apply refreshed account topology.
    pub fn on_account_properties(&self, account: AccountProperties) {
        self.locations.on_account_properties(account);
    }

    /// Forget cached state for a container that was deleted and recreated.
    pub fn on_container_recreated(&self, container: &str) {
        self.sessions.clear_container(container);
        self.resolver.invalidate_routing_map(container);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for CosmosClientCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosClientCore")
            .field("connection_mode", &self.config.connection_mode)
            .field("preferred_regions", &self.config.preferred_regions)
            .finish()
    }
}
