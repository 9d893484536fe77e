//! Request Context
//!
//! Context carried through the execution pipeline for one logical operation.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::diagnostics::{CosmosDiagnostics, Trace};
use crate::operation::{LogicalOperation, RequestOptions};

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Sent as `x-ms-activity-id` on every attempt of the operation
    pub activity_id: Uuid,

    pub options: RequestOptions,

    /// Caller cancellation; racers use child tokens of it
    pub cancel: CancellationToken,

    /// Root of the operation's diagnostics
    pub trace: Trace,

    started_at: Instant,
}

impl RequestContext {
    pub fn new(op: &LogicalOperation, options: RequestOptions, cancel: CancellationToken) -> Self {
        let activity_id = Uuid::new_v4();
        let trace = Trace::root(op.name());
        trace.add_datum("Activity Id", activity_id.to_string());
        trace.add_datum("Target", op.to_string());
        Self {
            activity_id,
            options,
            cancel,
            trace,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Close the root span and snapshot diagnostics.
    pub fn diagnostics(&self) -> CosmosDiagnostics {
        self.trace.end();
        CosmosDiagnostics::new(self.trace.clone())
    }
}
