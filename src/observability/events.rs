//! Observable client events
//!
//! Every log line emitted by the request path carries one of these names in
//! its `event` field, so log consumers can match on stable strings.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Client lifecycle
    /// Client built and ready
    ClientReady,
    /// Configuration loaded
    ConfigLoaded,

    // Operations
    /// Logical operation dispatched
    OperationBegin,
    /// Logical operation finished with a final response
    OperationComplete,
    /// Logical operation failed
    OperationFailed,

    // Attempts
    /// Network attempt failed and will be retried
    AttemptRetry,
    /// Racer moved to another region
    RegionFailover,
    /// Region marked unavailable in the location cache
    RegionMarkedUnavailable,

    // Hedging
    /// Additional region racer started
    HedgeLaunched,
    /// A racer produced the final result
    HedgeWon,

    // Write barrier
    /// Barrier polling started
    BarrierBegin,
    /// Replication caught up with the write
    BarrierComplete,
    /// Poll budget exhausted
    BarrierFailed,

    // Quorum reads
    /// Replicas never agreed on the selected LSN
    QuorumNotMet,

    // Termination
    /// Caller cancelled the operation
    OperationCancelled,
    /// End-to-end budget elapsed
    OperationTimedOut,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ClientReady => "CLIENT_READY",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::OperationBegin => "OPERATION_BEGIN",
            Event::OperationComplete => "OPERATION_COMPLETE",
            Event::OperationFailed => "OPERATION_FAILED",

            Event::AttemptRetry => "ATTEMPT_RETRY",
            Event::RegionFailover => "REGION_FAILOVER",
            Event::RegionMarkedUnavailable => "REGION_MARKED_UNAVAILABLE",

            Event::HedgeLaunched => "HEDGE_LAUNCHED",
            Event::HedgeWon => "HEDGE_WON",

            Event::BarrierBegin => "BARRIER_BEGIN",
            Event::BarrierComplete => "BARRIER_COMPLETE",
            Event::BarrierFailed => "BARRIER_FAILED",

            Event::QuorumNotMet => "QUORUM_NOT_MET",

            Event::OperationCancelled => "OPERATION_CANCELLED",
            Event::OperationTimedOut => "OPERATION_TIMED_OUT",
        }
    }

    /// Events worth a warning rather than a debug line
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::OperationFailed
                | Event::RegionMarkedUnavailable
                | Event::BarrierFailed
                | Event::QuorumNotMet
                | Event::OperationTimedOut
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::ClientReady,
            Event::ConfigLoaded,
            Event::OperationBegin,
            Event::OperationComplete,
            Event::OperationFailed,
            Event::AttemptRetry,
            Event::RegionFailover,
            Event::RegionMarkedUnavailable,
            Event::HedgeLaunched,
            Event::HedgeWon,
            Event::BarrierBegin,
            Event::BarrierComplete,
            Event::BarrierFailed,
            Event::QuorumNotMet,
            Event::OperationCancelled,
            Event::OperationTimedOut,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_warning_events() {
        assert!(Event::BarrierFailed.is_warning());
        assert!(!Event::HedgeLaunched.is_warning());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::HedgeWon), "HEDGE_WON");
    }
}
