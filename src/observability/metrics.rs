//! Client metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only when the client is created
//! - Thread-safe but lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::retry::FailureKind;

/// Operational counters of one client.
///
/// All counters use Relaxed atomics; readers only need eventually exact values.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Logical operations started
    operations: AtomicU64,
    /// Operations that ended in an error
    operations_failed: AtomicU64,
    /// Network attempts, barrier polls included
    attempts: AtomicU64,
    retries_throttled: AtomicU64,
    retries_gone: AtomicU64,
    retries_session: AtomicU64,
    retries_other: AtomicU64,
    region_failovers: AtomicU64,
    hedges_launched: AtomicU64,
    hedges_won: AtomicU64,
    barrier_polls: AtomicU64,
    barrier_failures: AtomicU64,
    cancellations: AtomicU64,
    timeouts: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_operations(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_operations_failed(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a retry under the bucket of its failure kind.
    pub fn increment_retries(&self, kind: FailureKind) {
        let counter = match kind {
            FailureKind::Throttled => &self.retries_throttled,
            FailureKind::Gone | FailureKind::PartitionRangeGone => &self.retries_gone,
            FailureKind::SessionNotAvailable => &self.retries_session,
            _ => &self.retries_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_region_failovers(&self) {
        self.region_failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_hedges_launched(&self) {
        self.hedges_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_hedges_won(&self) {
        self.hedges_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_barrier_polls(&self) {
        self.barrier_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_barrier_failures(&self) {
        self.barrier_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries_throttled: self.retries_throttled.load(Ordering::Relaxed),
            retries_gone: self.retries_gone.load(Ordering::Relaxed),
            retries_session: self.retries_session.load(Ordering::Relaxed),
            retries_other: self.retries_other.load(Ordering::Relaxed),
            region_failovers: self.region_failovers.load(Ordering::Relaxed),
            hedges_launched: self.hedges_launched.load(Ordering::Relaxed),
            hedges_won: self.hedges_won.load(Ordering::Relaxed),
            barrier_polls: self.barrier_polls.load(Ordering::Relaxed),
            barrier_failures: self.barrier_failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations: u64,
    pub operations_failed: u64,
    pub attempts: u64,
    pub retries_throttled: u64,
    pub retries_gone: u64,
    pub retries_session: u64,
    pub retries_other: u64,
    pub region_failovers: u64,
    pub hedges_launched: u64,
    pub hedges_won: u64,
    pub barrier_polls: u64,
    pub barrier_failures: u64,
    pub cancellations: u64,
    pub timeouts: u64,
}

impl MetricsSnapshot {
    pub fn total_retries(&self) -> u64 {
        self.retries_throttled + self.retries_gone + self.retries_session + self.retries_other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let snapshot = ClientMetrics::new().snapshot();
        assert_eq!(snapshot.operations, 0);
        assert_eq!(snapshot.total_retries(), 0);
    }

    #[test]
    fn test_retries_bucketed_by_kind() {
        let metrics = ClientMetrics::new();
        metrics.increment_retries(FailureKind::Throttled);
        metrics.increment_retries(FailureKind::Gone);
        metrics.increment_retries(FailureKind::PartitionRangeGone);
        metrics.increment_retries(FailureKind::SessionNotAvailable);
        metrics.increment_retries(FailureKind::ServiceUnavailable);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retries_throttled, 1);
        assert_eq!(snapshot.retries_gone, 2);
        assert_eq!(snapshot.retries_session, 1);
        assert_eq!(snapshot.retries_other, 1);
        assert_eq!(snapshot.total_retries(), 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = ClientMetrics::new();
        metrics.increment_hedges_launched();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["hedges_launched"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(ClientMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.increment_attempts();
                    m.increment_barrier_polls();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts, 1000);
        assert_eq!(snapshot.barrier_polls, 1000);
    }
}
