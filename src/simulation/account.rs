//! Simulated Cosmos account
//!
//! A multi-region account held in memory. Implements both `Transport` and
//! `AddressSource`, so a client can run end to end without a network.
//!
//! Regions share one replicated store. Replication to other regions is
//! instant unless a replication lag is configured, in which case the global
//! committed LSN only catches up after a number of HEAD polls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::operation::{OperationType, ResourceType};
use crate::routing::{AccountProperties, AddressSource, PartitionKey, PartitionKeyRange, Region, RoutingError, RoutingResult};
use crate::session::parse_container_token;
use crate::transport::{
    headers, status, sub_status, Endpoint, Headers, StoreRequest, StoreResponse, Transport, TransportError,
};

use super::store::{ContainerState, DocumentKey, RangeState, StoreError};

/// Request charge reported for reads and writes.
const READ_CHARGE: f64 = 1.0;
const WRITE_CHARGE: f64 = 5.0;

/// One request as seen by the simulated service.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub region: Region,
    pub address: String,
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub range_id: Option<String>,
    pub session_token: Option<String>,
}

pub struct SimulatedAccount {
    account: AccountProperties,
    replicas_per_region: usize,
    query_page_size: usize,
    containers: RwLock<HashMap<String, ContainerState>>,
    latencies: RwLock<HashMap<Region, Duration>>,
    header_overrides: RwLock<Vec<(String, String)>>,
    replication_lag_polls: AtomicU32,
    /// Replicas answering one LSN behind, with the number of responses left.
    lagging_replicas: Mutex<HashMap<(Region, usize), u32>>,
    requests: Mutex<Vec<RequestRecord>>,
}

impl SimulatedAccount {
    pub fn new(account: AccountProperties) -> Self {
        Self {
            account,
            replicas_per_region: 4,
            query_page_size: 100,
            containers: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            header_overrides: RwLock::new(Vec::new()),
            replication_lag_polls: AtomicU32::new(0),
            lagging_replicas: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replicas_per_region(mut self, replicas: usize) -> Self {
        self.replicas_per_region = replicas.max(1);
        self
    }

    pub fn with_query_page_size(mut self, size: usize) -> Self {
        self.query_page_size = size.max(1);
        self
    }

    pub fn account_properties(&self) -> AccountProperties {
        self.account.clone()
    }

    /// Create a container whose key space is split into `range_count` ranges.
    pub fn create_container(&self, name: &str, range_count: u32) {
        self.create_container_at_lsn(name, range_count, 0);
    }

    pub fn create_container_at_lsn(&self, name: &str, range_count: u32, initial_lsn: u64) {
        if let Ok(mut containers) = self.containers.write() {
            containers.insert(name.to_string(), ContainerState::new(range_count, initial_lsn));
        }
    }

    /// Split a range in two. Requests still addressed to it get 410/1002.
    pub fn split_range(&self, container: &str, range_id: &str) -> Option<(String, String)> {
        let mut containers = self.containers.write().ok()?;
        containers.get_mut(container)?.split(range_id)
    }

    /// Added to every response in `region`.
    pub fn set_region_latency(&self, region: &str, latency: Duration) {
        if let Ok(mut latencies) = self.latencies.write() {
            latencies.insert(Region::from(region), latency);
        }
    }

    /// Force a header value on every response, e.g. to pin a committed LSN.
    pub fn set_response_header(&self, name: &str, value: impl Into<String>) {
        if let Ok(mut overrides) = self.header_overrides.write() {
            overrides.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            overrides.push((name.to_string(), value.into()));
        }
    }

    pub fn clear_response_headers(&self) {
        if let Ok(mut overrides) = self.header_overrides.write() {
            overrides.clear();
        }
    }

    /// After each write, replication catches up only after `polls` HEAD requests.
    pub fn set_replication_lag(&self, polls: u32) {
        self.replication_lag_polls.store(polls, Ordering::SeqCst);
    }

    /// Replica `replica` in `region` reports an LSN one behind for its next
    /// `responses` responses. Replica 0 is the primary.
    pub fn set_lagging_replica(&self, region: &str, replica: usize, responses: u32) {
        if let Ok(mut lagging) = self.lagging_replicas.lock() {
            lagging.insert((Region::from(region), replica), responses);
        }
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn clear_requests(&self) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.clear();
        }
    }

    fn apply_replica_lag(&self, endpoint: &Endpoint, response: &mut StoreResponse) {
        let Some(replica) = endpoint
            .address
            .rsplit_once("/replica-")
            .and_then(|(_, index)| index.parse::<usize>().ok())
        else {
            return;
        };
        let Ok(mut lagging) = self.lagging_replicas.lock() else {
            return;
        };
        let Some(remaining) = lagging.get_mut(&(endpoint.region.clone(), replica)) else {
            return;
        };
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;

        if let Some(lsn) = response.headers.lsn() {
            let behind = lsn.saturating_sub(1);
            let committed = response.headers.global_committed_lsn().unwrap_or(behind).min(behind);
            response.headers.insert(headers::LSN, behind.to_string());
            response.headers.insert(headers::GLOBAL_COMMITTED_LSN, committed.to_string());
        }
    }

    fn latency(&self, region: &Region) -> Option<Duration> {
        self.latencies.read().ok()?.get(region).copied()
    }

    fn record(&self, endpoint: &Endpoint, request: &StoreRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RequestRecord {
                region: endpoint.region.clone(),
                address: endpoint.address.clone(),
                resource_type: request.resource_type,
                operation_type: request.operation_type,
                range_id: request.partition_key_range_id.clone(),
                session_token: request.headers.session_token().map(str::to_string),
            });
        }
    }

    fn handle(&self, endpoint: &Endpoint, request: &StoreRequest) -> Result<StoreResponse, TransportError> {
        if !self.account.read_regions.contains(&endpoint.region)
            && !self.account.write_regions.contains(&endpoint.region)
        {
            return Err(TransportError::EndpointUnreachable(endpoint.address.clone()));
        }
        if !request.is_read_only() && !self.accepts_writes(&endpoint.region) {
            return Ok(error_response(status::FORBIDDEN, sub_status::WRITE_FORBIDDEN));
        }

        let mut containers = match self.containers.write() {
            Ok(containers) => containers,
            Err(_) => return Ok(error_response(status::INTERNAL_SERVER_ERROR, 0)),
        };
        let container = match containers.get_mut(&request.container) {
            Some(container) => container,
            None => return Ok(error_response(status::NOT_FOUND, 0)),
        };

        if request.resource_type == ResourceType::Collection {
            return Ok(self.handle_collection(container, request));
        }

        let range = match self.target_range(container, request) {
            Some(range) => range,
            None => {
                return Ok(error_response(status::GONE, sub_status::PARTITION_KEY_RANGE_GONE));
            }
        };

        if request.is_read_only() {
            if let Some(missing) = session_not_reached(range, request) {
                return Ok(missing);
            }
        }

        let lag = self.replication_lag_polls.load(Ordering::SeqCst);
        let mut response = match handle_document(range, request, lag, self.query_page_size) {
            Ok(response) => response,
            Err(e) => error_response(e.status(), 0),
        };
        response.headers.insert(
            headers::REQUEST_CHARGE,
            if request.is_read_only() { READ_CHARGE } else { WRITE_CHARGE }.to_string(),
        );
        self.stamp(&mut response.headers, range);
        Ok(response)
    }

    fn accepts_writes(&self, region: &Region) -> bool {
        self.account.write_regions.contains(region)
    }

    /// Range addressed by the request; `None` when it split away.
    fn target_range<'c>(&self, container: &'c mut ContainerState, request: &StoreRequest) -> Option<&'c mut RangeState> {
        match (&request.partition_key_range_id, &request.partition_key) {
            (Some(id), Some(pk)) => {
                let range = container.range_mut(id)?;
                if range.range.contains(pk.effective_hash()) {
                    Some(range)
                } else {
                    None
                }
            }
            (Some(id), None) => container.range_mut(id),
            (None, Some(pk)) => container.range_for_key_mut(pk),
            (None, None) => None,
        }
    }

    fn handle_collection(&self, container: &mut ContainerState, request: &StoreRequest) -> StoreResponse {
        let range = request
            .partition_key_range_id
            .as_deref()
            .and_then(|id| container.range_mut(id));

        match (request.operation_type, range) {
            (OperationType::Head, Some(range)) => {
                range.observe_poll();
                let mut response = StoreResponse::new(status::OK);
                self.stamp(&mut response.headers, range);
                response
            }
            (OperationType::Head, None) => {
                // Container-wide HEAD reports the least replicated range.
                let ranges: Vec<PartitionKeyRange> = container.ranges();
                let mut lowest: Option<(u64, u64)> = None;
                for range in &ranges {
                    if let Some(state) = container.range_mut(&range.id) {
                        state.observe_poll();
                        let pair = (state.lsn, state.committed_lsn);
                        lowest = Some(match lowest {
                            Some(current) if current.1 <= pair.1 => current,
                            _ => pair,
                        });
                    }
                }
                let (lsn, committed) = lowest.unwrap_or((0, 0));
                let mut response = StoreResponse::new(status::OK);
                self.stamp_lsns(&mut response.headers, lsn, committed);
                response
            }
            (OperationType::Read, _) => {
                let body = json!({ "id": request.container, "ranges": container.ranges() });
                StoreResponse::new(status::OK).with_payload(body.to_string().into_bytes())
            }
            _ => error_response(status::METHOD_NOT_ALLOWED, 0),
        }
    }

    fn stamp(&self, headers_out: &mut Headers, range: &RangeState) {
        self.stamp_lsns(headers_out, range.lsn, range.committed_lsn);
        headers_out.insert(headers::PARTITION_KEY_RANGE_ID, range.range.id.as_str());
        headers_out.insert(
            headers::SESSION_TOKEN,
            format!("{}:0#{}", range.range.id, range.lsn),
        );
    }

    fn stamp_lsns(&self, headers_out: &mut Headers, lsn: u64, committed: u64) {
        headers_out.insert(headers::LSN, lsn.to_string());
        headers_out.insert(headers::GLOBAL_COMMITTED_LSN, committed.to_string());
        headers_out.insert(headers::GLOBAL_N_REGION_COMMITTED_GLSN, committed.to_string());
        headers_out.insert(
            headers::NUMBER_OF_READ_REGIONS,
            self.account.read_regions.len().saturating_sub(1).to_string(),
        );
    }

    fn apply_overrides(&self, response: &mut StoreResponse) {
        if let Ok(overrides) = self.header_overrides.read() {
            for (name, value) in overrides.iter() {
                response.headers.insert(name, value.as_str());
            }
        }
    }
}

/// 404/1002 when the caller's session token is ahead of the range.
fn session_not_reached(range: &RangeState, request: &StoreRequest) -> Option<StoreResponse> {
    let raw = request.headers.session_token()?;
    let tokens = parse_container_token(raw, Some(&range.range.id)).ok()?;
    let (_, token) = tokens.into_iter().find(|(id, _)| *id == range.range.id)?;
    if token.global_lsn > range.lsn {
        Some(error_response(status::NOT_FOUND, sub_status::READ_SESSION_NOT_AVAILABLE))
    } else {
        None
    }
}

fn handle_document(
    range: &mut RangeState,
    request: &StoreRequest,
    lag: u32,
    page_size: usize,
) -> Result<StoreResponse, StoreError> {
    let if_match = request.headers.get(headers::IF_MATCH);
    let minimal = request.headers.get(headers::PREFER) == Some(headers::PREFER_RETURN_MINIMAL);

    let document_response = |status_code: u16, body: &Value, etag: &str| {
        let response = StoreResponse::new(status_code).with_header(headers::ETAG, etag);
        if minimal {
            response
        } else {
            response.with_payload(body.to_string().into_bytes())
        }
    };

    match request.operation_type {
        OperationType::Read => {
            let key = document_key(request)?;
            let document = range.read(&key)?;
            Ok(StoreResponse::new(status::OK)
                .with_header(headers::ETAG, document.etag.as_str())
                .with_payload(document.body.to_string().into_bytes()))
        }
        OperationType::Create => {
            let (key, pk) = (document_key(request)?, partition_key(request)?);
            let document = range.create(key, pk, payload(request)?, lag)?;
            Ok(document_response(status::CREATED, &document.body, &document.etag))
        }
        OperationType::Upsert => {
            let (key, pk) = (document_key(request)?, partition_key(request)?);
            let (document, created) = range.upsert(key, pk, payload(request)?, lag);
            let status_code = if created { status::CREATED } else { status::OK };
            Ok(document_response(status_code, &document.body, &document.etag))
        }
        OperationType::Replace => {
            let (key, pk) = (document_key(request)?, partition_key(request)?);
            let document = range.replace(key, pk, payload(request)?, if_match, lag)?;
            Ok(document_response(status::OK, &document.body, &document.etag))
        }
        OperationType::Patch => {
            let key = document_key(request)?;
            let document = range.patch(key, payload(request)?, if_match, lag)?;
            Ok(document_response(status::OK, &document.body, &document.etag))
        }
        OperationType::Delete => {
            let key = document_key(request)?;
            range.delete(&key, if_match, lag)?;
            Ok(StoreResponse::new(status::NO_CONTENT))
        }
        OperationType::Batch => {
            let pk = partition_key(request)?;
            let items = match payload(request)? {
                Value::Array(items) => items,
                _ => return Err(StoreError::BadRequest),
            };
            let mut results = Vec::with_capacity(items.len());
            for item in items {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or(StoreError::BadRequest)?
                    .to_string();
                let (document, created) = range.upsert((pk.to_header_value(), id), pk.clone(), item, lag);
                let status_code = if created { status::CREATED } else { status::OK };
                results.push(json!({ "statusCode": status_code, "eTag": document.etag }));
            }
            Ok(StoreResponse::new(status::OK).with_payload(Value::Array(results).to_string().into_bytes()))
        }
        OperationType::Query | OperationType::ReadFeed => {
            let offset = request
                .headers
                .get(headers::CONTINUATION)
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(0);
            let (documents, more) = range.page(offset, page_size);
            let count = documents.len();
            let body = json!({ "Documents": documents, "_count": count });
            let mut response = StoreResponse::new(status::OK).with_payload(body.to_string().into_bytes());
            if more {
                response.headers.insert(headers::CONTINUATION, (offset + count).to_string());
            }
            Ok(response)
        }
        OperationType::ChangeFeed => {
            let since = request
                .headers
                .get(headers::CONTINUATION)
                .and_then(|c| c.parse::<u64>().ok())
                .unwrap_or(0);
            let changes = range.changes_since(since);
            let response = if changes.is_empty() {
                StoreResponse::new(status::NOT_MODIFIED)
            } else {
                let count = changes.len();
                let body = json!({ "Documents": changes, "_count": count });
                StoreResponse::new(status::OK).with_payload(body.to_string().into_bytes())
            };
            Ok(response.with_header(headers::CONTINUATION, range.lsn.to_string()))
        }
        OperationType::Head => Ok(StoreResponse::new(status::OK)),
    }
}

fn document_key(request: &StoreRequest) -> Result<DocumentKey, StoreError> {
    let id = request.item_id.clone().ok_or(StoreError::BadRequest)?;
    Ok((partition_key(request)?.to_header_value(), id))
}

fn partition_key(request: &StoreRequest) -> Result<PartitionKey, StoreError> {
    request.partition_key.clone().ok_or(StoreError::BadRequest)
}

fn payload(request: &StoreRequest) -> Result<Value, StoreError> {
    let bytes = request.payload.as_deref().ok_or(StoreError::BadRequest)?;
    serde_json::from_slice(bytes).map_err(|_| StoreError::BadRequest)
}

fn error_response(status_code: u16, sub: u32) -> StoreResponse {
    StoreResponse::new(status_code).with_header(headers::SUB_STATUS, sub.to_string())
}

impl Transport for SimulatedAccount {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a StoreRequest,
    ) -> BoxFuture<'a, Result<StoreResponse, TransportError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency(&endpoint.region) {
                tokio::time::sleep(latency).await;
            }
            self.record(endpoint, request);
            let mut response = self.handle(endpoint, request)?;
            self.apply_replica_lag(endpoint, &mut response);
            if let Some(activity_id) = request.headers.activity_id() {
                response.headers.insert(headers::ACTIVITY_ID, activity_id);
            }
            self.apply_overrides(&mut response);
            Ok(response)
        })
    }
}

impl AddressSource for SimulatedAccount {
    fn fetch_routing_map<'a>(
        &'a self,
        container: &'a str,
    ) -> BoxFuture<'a, RoutingResult<Vec<PartitionKeyRange>>> {
        Box::pin(async move {
            let containers = self
                .containers
                .read()
                .map_err(|_| RoutingError::Source("container table poisoned".to_string()))?;
            containers
                .get(container)
                .map(|c| c.ranges())
                .ok_or_else(|| RoutingError::Source(format!("container {} does not exist", container)))
        })
    }

    fn fetch_addresses<'a>(
        &'a self,
        container: &'a str,
        range_id: Option<&'a str>,
        region: &'a Region,
    ) -> BoxFuture<'a, RoutingResult<Vec<Endpoint>>> {
        Box::pin(async move {
            let known = self.account.read_regions.contains(region) || self.account.write_regions.contains(region);
            if !known {
                return Err(RoutingError::NoAddresses {
                    container: container.to_string(),
                    range: range_id.unwrap_or("-").to_string(),
                    region: region.to_string(),
                });
            }

            let host = region.as_str().to_lowercase().replace(' ', "-");
            Ok(match range_id {
                Some(range) => (0..self.replicas_per_region)
                    .map(|i| {
                        Endpoint::new(
                            region.clone(),
                            format!("rntbd://{}.sim/{}/{}/replica-{}", host, container, range, i),
                        )
                    })
                    .collect(),
                None => vec![Endpoint::new(region.clone(), format!("https://{}.sim:443/", host))],
            })
        })
    }
}
