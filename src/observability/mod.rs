//! Observability
//!
//! - Structured logging through `tracing`, one stable event name per line
//! - Lock-free client metrics
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No effect on retry, hedging or barrier decisions
//! 3. No background tasks
//!
//! # Usage
//!
//! ```ignore
//! use cosmos_core::observability::{log_event, Event};
//!
//! log_event(Event::HedgeLaunched, "West US", "hedging read to next region");
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{ClientMetrics, MetricsSnapshot};

use tracing::{debug, warn};

/// Log a client event with the activity or region it concerns.
pub fn log_event(event: Event, subject: &str, message: &str) {
    if event.is_warning() {
        warn!(event = event.as_str(), subject = %subject, "{}", message);
    } else {
        debug!(event = event.as_str(), subject = %subject, "{}", message);
    }
}
