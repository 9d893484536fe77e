//! Quorum reads
//!
//! Strong and bounded staleness point reads are served from a read quorum
//! of secondaries instead of a single replica. When the quorum disagrees on
//! the highest LSN, a read barrier polls the replicas with HEAD requests
//! until enough of them have caught up.
//!
//! ```text
//!  read quorum ──[met]──────────────────────────────────> selected response
//!       │                                                        ^
//!   [selected] ── barrier on secondaries ──[met]─────────────────┤
//!       │                  │                                     │
//!       │             [not met, strong] ── barrier incl. primary ┘
//!   [not selected] ── read primary
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::diagnostics::{spans, StoreResponseStatistics, Trace};
use crate::observability::{log_event, Event};
use crate::operation::{ConsistencyLevel, LogicalOperation, OperationType, ResourceType};
use crate::routing::ResolvedAddress;
use crate::transport::{
    is_non_transient, status, sub_status, ConnectionMode, Endpoint, StoreRequest, StoreResponse, Transport,
    TransportError,
};

/// How a read picks its replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Any single replica, rotating on retries.
    Any,
    /// The primary replica only.
    Primary,
    /// Read quorum, with a barrier that may include the primary.
    Strong,
    /// Read quorum, barrier on secondaries only.
    BoundedStaleness,
}

impl ReadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "Any",
            Self::Primary => "Primary",
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
        }
    }

    pub fn is_quorum(&self) -> bool {
        matches!(self, Self::Strong | Self::BoundedStaleness)
    }
}

/// Read mode for a read-only operation at `consistency`.
///
/// Non-document reads go to the primary. Quorum reads apply to document
/// point reads in direct mode; the gateway runs its own quorum logic.
pub fn read_mode(op: &LogicalOperation, consistency: ConsistencyLevel, mode: ConnectionMode) -> ReadMode {
    if op.resource_type != ResourceType::Document {
        return ReadMode::Primary;
    }
    if mode == ConnectionMode::Gateway || op.operation_type != OperationType::Read {
        return ReadMode::Any;
    }
    match consistency {
        ConsistencyLevel::Strong => ReadMode::Strong,
        ConsistencyLevel::BoundedStaleness => ReadMode::BoundedStaleness,
        _ => ReadMode::Any,
    }
}

/// Replicas that must agree for a quorum.
pub fn read_quorum(replica_count: usize) -> usize {
    replica_count - replica_count / 2
}

/// Read barrier budget and spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumOptions {
    pub max_barrier_rounds: u32,
    pub barrier_interval: Duration,
    /// Extra rounds for global strong reads once the regional rounds are spent.
    pub max_global_barrier_rounds: u32,
    pub global_barrier_interval: Duration,
}

impl Default for QuorumOptions {
    fn default() -> Self {
        Self {
            max_barrier_rounds: 6,
            barrier_interval: Duration::from_millis(5),
            max_global_barrier_rounds: 30,
            global_barrier_interval: Duration::from_millis(30),
        }
    }
}

/// A response that can take part in a quorum.
struct ReplicaRead {
    response: StoreResponse,
    lsn: u64,
    global_committed_lsn: u64,
    read_regions: u32,
}

/// The highest LSN seen by a quorum read and whether enough replicas hold it.
struct QuorumSelection {
    selected: StoreResponse,
    lsn: u64,
    /// Global committed LSN the barrier must also observe, for global strong reads.
    global_target: Option<u64>,
    met: bool,
}

fn select(reads: Vec<ReplicaRead>, quorum: usize, global_strong: bool) -> Option<QuorumSelection> {
    let max_lsn = reads.iter().map(|r| r.lsn).max()?;
    let at_max = reads.iter().filter(|r| r.lsn == max_lsn).count();
    let max_global = reads.iter().map(|r| r.global_committed_lsn).max().unwrap_or(0);
    let check_global = global_strong && reads.iter().any(|r| r.read_regions > 0);

    let global_target = check_global.then_some(max_lsn);
    let met = at_max >= quorum && global_target.map_or(true, |target| max_global >= target);

    let position = reads
        .iter()
        .position(|r| r.lsn == max_lsn && r.response.is_success())
        .or_else(|| reads.iter().position(|r| r.lsn == max_lsn))?;
    let selected = reads.into_iter().nth(position)?.response;

    Some(QuorumSelection {
        selected,
        lsn: max_lsn,
        global_target,
        met,
    })
}

/// Serves quorum reads over a transport.
pub struct QuorumReader {
    transport: Arc<dyn Transport>,
    mode: ConnectionMode,
    options: QuorumOptions,
}

impl QuorumReader {
    pub fn new(transport: Arc<dyn Transport>, mode: ConnectionMode, options: QuorumOptions) -> Self {
        Self {
            transport,
            mode,
            options,
        }
    }

    /// Read `request` at `read_mode` from the replicas in `resolved`.
    ///
    /// Every replica request is recorded under `trace`. A quorum that cannot
    /// be established surfaces as a `410`, which the retry policy treats as
    /// gone.
    pub async fn read(
        &self,
        resolved: &ResolvedAddress,
        request: &StoreRequest,
        read_mode: ReadMode,
        global_strong: bool,
        trace: &Trace,
    ) -> Result<StoreResponse, TransportError> {
        let replicas = &resolved.replicas;
        let quorum = read_quorum(replicas.len());
        let secondaries = if replicas.len() > quorum {
            &replicas[1..=quorum]
        } else {
            &replicas[..quorum]
        };

        let span = trace.child(spans::QUORUM_READ);
        span.add_datum("Read Mode", read_mode.as_str());
        span.add_datum("Read Quorum", quorum as u64);

        let reads = self.read_replicas(secondaries, request, &span).await;
        let result = match reads {
            Ok(reads) if reads.len() >= quorum => {
                self.complete(resolved, request, read_mode, global_strong, quorum, reads, &span)
                    .await
            }
            Ok(_) => {
                debug!(quorum, "read quorum not selected, reading primary");
                span.add_datum("Quorum Result", "QuorumNotSelected");
                self.send(resolved.primary(), request, &span).await
            }
            Err(e) => Err(e),
        };
        span.end();
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        resolved: &ResolvedAddress,
        request: &StoreRequest,
        read_mode: ReadMode,
        global_strong: bool,
        quorum: usize,
        reads: Vec<ReplicaRead>,
        span: &Trace,
    ) -> Result<StoreResponse, TransportError> {
        let Some(selection) = select(reads, quorum, global_strong) else {
            return Err(quorum_not_met(quorum));
        };
        if selection.met {
            span.add_datum("Quorum Result", "QuorumMet");
            return Ok(selection.selected);
        }

        span.add_datum("Quorum Result", "QuorumSelected");
        span.add_datum("Selected LSN", selection.lsn);
        let replicas = &resolved.replicas;
        let secondaries = if replicas.len() > quorum {
            &replicas[1..=quorum]
        } else {
            &replicas[..quorum]
        };
        if self
            .wait_for_read_barrier(request, secondaries, quorum, &selection, span)
            .await
        {
            return Ok(selection.selected);
        }

        if read_mode == ReadMode::Strong {
            let with_primary = &replicas[..quorum.min(replicas.len())];
            if self
                .wait_for_read_barrier(request, with_primary, quorum, &selection, span)
                .await
            {
                return Ok(selection.selected);
            }
        }

        log_event(
            Event::QuorumNotMet,
            resolved.region.as_str(),
            &format!(
                "{} read could not converge on lsn {} with quorum {}",
                read_mode.as_str(),
                selection.lsn,
                quorum
            ),
        );
        Err(quorum_not_met(quorum))
    }

    /// Poll `replicas` with HEAD requests until a quorum reports the selected LSN.
    async fn wait_for_read_barrier(
        &self,
        request: &StoreRequest,
        replicas: &[Endpoint],
        quorum: usize,
        selection: &QuorumSelection,
        span: &Trace,
    ) -> bool {
        let barrier = span.child(spans::READ_BARRIER);
        barrier.add_datum("LSN", selection.lsn);
        let head = StoreRequest::head_collection(&request.container, request.partition_key_range_id.clone());

        let regional = (0..self.options.max_barrier_rounds).map(|round| {
            let wait = if round == 0 {
                Duration::ZERO
            } else {
                self.options.barrier_interval
            };
            (wait, false)
        });
        let global = (0..self.options.max_global_barrier_rounds)
            .filter(|_| selection.global_target.is_some())
            .map(|_| (self.options.global_barrier_interval, true));

        let mut rounds = 0u32;
        for (wait, global_phase) in regional.chain(global) {
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            rounds += 1;

            let Ok(reads) = self.read_replicas(replicas, &head, &barrier).await else {
                continue;
            };
            let caught_up = reads.iter().filter(|r| r.lsn >= selection.lsn).count();
            let max_global = reads.iter().map(|r| r.global_committed_lsn).max().unwrap_or(0);
            let global_ok = selection.global_target.map_or(true, |target| max_global >= target);
            if caught_up >= quorum && global_ok {
                barrier.add_datum("Rounds", rounds);
                barrier.add_datum("Global Phase", global_phase);
                barrier.end();
                return true;
            }
        }

        barrier.add_datum("Rounds", rounds);
        barrier.end();
        false
    }

    /// Send `request` to every replica concurrently and keep the responses
    /// that carry an LSN. A request that was never answered fails the read.
    async fn read_replicas(
        &self,
        replicas: &[Endpoint],
        request: &StoreRequest,
        span: &Trace,
    ) -> Result<Vec<ReplicaRead>, TransportError> {
        let mut pending: FuturesUnordered<_> = replicas
            .iter()
            .map(|endpoint| self.send(endpoint, request, span))
            .collect();

        let mut reads = Vec::with_capacity(replicas.len());
        let mut last_error = None;
        while let Some(result) = pending.next().await {
            match result {
                Ok(response) => {
                    let valid = is_non_transient(response.status, response.sub_status());
                    if let (true, Some(lsn)) = (valid, response.headers.lsn()) {
                        reads.push(ReplicaRead {
                            lsn,
                            global_committed_lsn: response.headers.global_committed_lsn().unwrap_or(0),
                            read_regions: response.headers.number_of_read_regions().unwrap_or(0),
                            response,
                        });
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        match (reads.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(reads),
        }
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &StoreRequest,
        span: &Trace,
    ) -> Result<StoreResponse, TransportError> {
        let name = if request.operation_type == OperationType::Head {
            spans::BARRIER_REQUEST
        } else {
            spans::REPLICA_READ
        };
        let child = span.child(name);
        let started = Instant::now();
        let result = self.transport.invoke(endpoint, request).await;
        let stats = match &result {
            Ok(response) => StoreResponseStatistics::from_response(
                request,
                self.mode,
                endpoint.region.as_str(),
                &endpoint.address,
                response,
            ),
            Err(e) => {
                let (status_code, sub) = e.status().unwrap_or((0, 0));
                StoreResponseStatistics::from_failure(
                    request,
                    self.mode,
                    endpoint.region.as_str(),
                    &endpoint.address,
                    status_code,
                    sub,
                    e.to_string(),
                )
            }
        };
        child.record_store_response(stats, started);
        child.end();
        result
    }
}

fn quorum_not_met(quorum: usize) -> TransportError {
    TransportError::server(
        status::GONE,
        sub_status::UNKNOWN,
        format!("read quorum of {} not met", quorum),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{PartitionKey, Region};
    use crate::transport::headers;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;

    /// Each replica reports a fixed LSN; replicas not listed report `default_lsn`.
    struct FixedLsns {
        lsns: HashMap<String, u64>,
        default_lsn: u64,
    }

    impl Transport for FixedLsns {
        fn invoke<'a>(
            &'a self,
            endpoint: &'a Endpoint,
            _request: &'a StoreRequest,
        ) -> BoxFuture<'a, Result<StoreResponse, TransportError>> {
            let lsn = self.lsns.get(&endpoint.address).copied().unwrap_or(self.default_lsn);
            Box::pin(async move {
                Ok(StoreResponse::new(200)
                    .with_header(headers::LSN, lsn.to_string())
                    .with_header(headers::GLOBAL_COMMITTED_LSN, lsn.to_string()))
            })
        }
    }

    fn resolved(count: usize) -> ResolvedAddress {
        ResolvedAddress {
            range_id: Some("0".to_string()),
            region: Region::from("A"),
            replicas: (0..count)
                .map(|i| Endpoint::new(Region::from("A"), format!("rntbd://a/{}", i)))
                .collect(),
        }
    }

    fn reader(lsns: &[(usize, u64)], default_lsn: u64) -> QuorumReader {
        let lsns = lsns
            .iter()
            .map(|(i, lsn)| (format!("rntbd://a/{}", i), *lsn))
            .collect();
        let options = QuorumOptions {
            barrier_interval: Duration::from_millis(1),
            global_barrier_interval: Duration::from_millis(1),
            ..QuorumOptions::default()
        };
        QuorumReader::new(
            Arc::new(FixedLsns { lsns, default_lsn }),
            ConnectionMode::Direct,
            options,
        )
    }

    fn point_read() -> StoreRequest {
        let op = LogicalOperation::read_item("c", PartitionKey::from("p"), "1");
        StoreRequest::from_operation(&op, Some("0".to_string()))
    }

    #[test]
    fn test_quorum_size() {
        assert_eq!(read_quorum(1), 1);
        assert_eq!(read_quorum(3), 2);
        assert_eq!(read_quorum(4), 2);
        assert_eq!(read_quorum(5), 3);
    }

    #[test]
    fn test_read_mode_by_consistency() {
        let read = LogicalOperation::read_item("c", PartitionKey::from("p"), "1");
        assert_eq!(
            read_mode(&read, ConsistencyLevel::Strong, ConnectionMode::Direct),
            ReadMode::Strong
        );
        assert_eq!(
            read_mode(&read, ConsistencyLevel::BoundedStaleness, ConnectionMode::Direct),
            ReadMode::BoundedStaleness
        );
        assert_eq!(
            read_mode(&read, ConsistencyLevel::Session, ConnectionMode::Direct),
            ReadMode::Any
        );
        assert_eq!(
            read_mode(&read, ConsistencyLevel::Strong, ConnectionMode::Gateway),
            ReadMode::Any
        );
        assert_eq!(
            read_mode(&LogicalOperation::read_container("c"), ConsistencyLevel::Strong, ConnectionMode::Direct),
            ReadMode::Primary
        );
    }

    #[tokio::test]
    async fn test_agreeing_secondaries_meet_quorum() {
        let trace = Trace::root("ReadDocument");
        let response = reader(&[], 10)
            .read(&resolved(4), &point_read(), ReadMode::Strong, false, &trace)
            .await
            .unwrap();
        assert_eq!(response.headers.lsn(), Some(10));
        assert_eq!(trace.all_store_responses().len(), 2);
        assert!(trace.find(spans::READ_BARRIER).is_empty());
    }

    #[tokio::test]
    async fn test_strong_barrier_includes_primary() {
        // Replica 2 never catches up; the primary and replica 1 agree.
        let trace = Trace::root("ReadDocument");
        let response = reader(&[(2, 9)], 10)
            .read(&resolved(4), &point_read(), ReadMode::Strong, false, &trace)
            .await
            .unwrap();
        assert_eq!(response.headers.lsn(), Some(10));
        assert_eq!(trace.find(spans::READ_BARRIER).len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_staleness_fails_without_secondary_quorum() {
        let trace = Trace::root("ReadDocument");
        let err = reader(&[(2, 9)], 10)
            .read(&resolved(4), &point_read(), ReadMode::BoundedStaleness, false, &trace)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some((status::GONE, sub_status::UNKNOWN)));
        assert_eq!(trace.find(spans::READ_BARRIER).len(), 1);
        // Two reads plus two HEADs in each of the six barrier rounds.
        assert_eq!(trace.all_store_responses().len(), 14);
    }
}
