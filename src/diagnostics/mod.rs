//! Diagnostics
//!
//! Every operation owns a trace tree. Retries, hedge racers and barrier polls
//! add spans and attempt statistics to it; callers get read-only projections.
//! Nothing in here feeds back into retry or hedging decisions.

mod statistics;
mod trace;

pub use statistics::StoreResponseStatistics;
pub use trace::Trace;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::transport::ConnectionMode;

/// Data keys written by the availability strategy and the write barrier.
pub mod keys {
    pub const HEDGE_CONTEXT: &str = "Hedge Context";
    pub const HEDGE_REGIONS: &str = "Hedge Regions";
    pub const EXCLUDED_REGIONS: &str = "Excluded Regions";
    pub const ORIGINAL_REQUEST: &str = "Original Request";
    pub const HEDGED_REQUEST: &str = "Hedged Request";
    pub const BARRIER_OUTCOME: &str = "Barrier Outcome";
    pub const RETRY_DECISIONS: &str = "Retry Decisions";
}

/// Span names used across the crate.
pub mod spans {
    pub const RACER: &str = "Racer";
    pub const ATTEMPT: &str = "Attempt";
    pub const ADDRESS_RESOLUTION: &str = "Address Resolution";
    pub const QUORUM_READ: &str = "Quorum Read";
    pub const REPLICA_READ: &str = "Replica Read";
    pub const READ_BARRIER: &str = "Read Barrier";
    pub const BARRIER: &str = "Write Barrier";
    pub const BARRIER_REQUEST: &str = "Barrier Request";
}

/// Diagnostics handed to callers with every response and error.
#[derive(Debug, Clone)]
pub struct CosmosDiagnostics {
    trace: Trace,
}

impl CosmosDiagnostics {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.trace.duration()
    }

    pub fn store_responses(&self) -> Vec<StoreResponseStatistics> {
        self.trace.all_store_responses()
    }

    /// Regions contacted, in order of first contact.
    pub fn contacted_regions(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.store_responses()
            .into_iter()
            .filter(|s| seen.insert(s.region.clone()))
            .map(|s| s.region)
            .collect()
    }

    pub fn head_request_count(&self) -> usize {
        self.store_responses()
            .iter()
            .filter(|s| s.is_head_collection())
            .count()
    }

    pub fn find_spans(&self, name: &str) -> Vec<Trace> {
        self.trace.find(name)
    }

    /// First value for `key` anywhere in the trace.
    pub fn datum(&self, key: &str) -> Option<Value> {
        self.trace.find_data(key).into_iter().next()
    }

    /// Direct-mode attempts grouped by `(status, sub-status)` and gateway-mode
    /// attempts grouped by status.
    pub fn summary(&self) -> DiagnosticsSummary {
        let mut summary = DiagnosticsSummary::default();
        for stats in self.store_responses() {
            match stats.mode {
                ConnectionMode::Direct => {
                    *summary
                        .direct
                        .entry((stats.status_code, stats.sub_status_code))
                        .or_default() += 1;
                }
                ConnectionMode::Gateway => {
                    *summary.gateway.entry(stats.status_code).or_default() += 1;
                }
            }
            summary.request_charge += stats.request_charge;
        }
        summary
    }

    pub fn to_json(&self) -> Value {
        self.trace.to_json()
    }
}

impl fmt::Display for CosmosDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Attempt counts derived from a trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsSummary {
    pub direct: BTreeMap<(u16, u32), usize>,
    pub gateway: BTreeMap<u16, usize>,
    pub request_charge: f64,
}

impl DiagnosticsSummary {
    pub fn direct_count(&self, status: u16, sub_status: u32) -> usize {
        self.direct.get(&(status, sub_status)).copied().unwrap_or(0)
    }

    pub fn gateway_count(&self, status: u16) -> usize {
        self.gateway.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.direct.values().sum::<usize>() + self.gateway.values().sum::<usize>()
    }
}
