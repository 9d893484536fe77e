//! Per-operation retry bookkeeping.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::routing::Region;

use super::classify::FailureKind;

/// Counters for one racer of one operation. Never shared.
#[derive(Debug, Clone)]
pub struct RetryContext {
    started_at: Instant,
    failures: BTreeMap<FailureKind, u32>,
    /// Summed throttling delay.
    pub throttle_wait: Duration,
    /// Summed delay of every retry.
    pub total_backoff: Duration,
    pub session_retries_in_region: u32,
    pub region_failovers: u32,
    pub regions_tried: Vec<Region>,
    /// An explicit caller token was sent ahead of the locally known one.
    pub explicit_session_token: bool,
    pub used_local_session_token: bool,
    decisions: Vec<String>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            failures: BTreeMap::new(),
            throttle_wait: Duration::ZERO,
            total_backoff: Duration::ZERO,
            session_retries_in_region: 0,
            region_failovers: 0,
            regions_tried: Vec::new(),
            explicit_session_token: false,
            used_local_session_token: false,
            decisions: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Count a failure and return how many of this kind came before it.
    pub fn record_failure(&mut self, kind: FailureKind) -> u32 {
        let counter = self.failures.entry(kind).or_insert(0);
        *counter += 1;
        *counter - 1
    }

    pub fn failures(&self, kind: FailureKind) -> u32 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn gone_failures(&self) -> u32 {
        self.failures(FailureKind::Gone) + self.failures(FailureKind::PartitionRangeGone)
    }

    pub fn enter_region(&mut self, region: &Region) {
        if self.regions_tried.last() != Some(region) {
            self.regions_tried.push(region.clone());
        }
    }

    pub fn record_decision(&mut self, decision: impl Into<String>) {
        self.decisions.push(decision.into());
    }

    pub fn decisions(&self) -> &[String] {
        &self.decisions
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failure_returns_prior_count() {
        let mut ctx = RetryContext::new();
        assert_eq!(ctx.record_failure(FailureKind::Throttled), 0);
        assert_eq!(ctx.record_failure(FailureKind::Throttled), 1);
        assert_eq!(ctx.record_failure(FailureKind::Gone), 0);
        assert_eq!(ctx.record_failure(FailureKind::PartitionRangeGone), 0);
        assert_eq!(ctx.gone_failures(), 2);
        assert_eq!(ctx.failures(FailureKind::Throttled), 2);
    }

    #[test]
    fn test_regions_tried_collapses_repeats() {
        let mut ctx = RetryContext::new();
        ctx.enter_region(&Region::from("A"));
        ctx.enter_region(&Region::from("A"));
        ctx.enter_region(&Region::from("B"));
        ctx.enter_region(&Region::from("A"));
        assert_eq!(ctx.regions_tried.len(), 3);
    }
}
