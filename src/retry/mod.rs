//! Retry policy engine
//!
//! Decides, per failed attempt, whether to resend and where:
//!
//! | Failure | Action |
//! |---|---|
//! | 429 | same endpoint after `x-ms-retry-after-ms` or backoff |
//! | 410, connection failure | refresh addresses (or routing map on split), resend |
//! | 404/1002 | next replica, then next region, then the local session token |
//! | 503, 403/3, 500 and 408 on reads | next region |
//!
//! A write whose failed attempt may have been applied is only resent when it is
//! idempotent.

mod classify;
mod context;
mod options;
mod policy;

pub use classify::{classify_error, classify_response, classify_routing_error, Failure, FailureKind};
pub use context::RetryContext;
pub use options::{BackoffPolicy, RetryOptions};
pub use policy::{AttemptInfo, RetryDecision, RetryPolicy, RetryTarget};
