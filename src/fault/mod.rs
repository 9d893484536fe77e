//! Fault injection
//!
//! Rules that make a transport fail in controlled ways, for exercising the
//! retry, hedging and barrier paths without a misbehaving service.
//!
//! # Usage
//!
//! ```ignore
//! let faults = FaultInjectingTransport::new(inner);
//! let rule = FaultInjectionRule::new(
//!     "session-a",
//!     FaultCondition::new().region("East US").operation_type(OperationType::Read),
//!     ServerErrorResult::new(FaultErrorType::ReadSessionNotAvailable),
//! )?;
//! let handle = faults.add_rule(rule)?;
//! handle.disable();
//! ```

mod errors;
mod rule;
mod transport;

pub use errors::{FaultError, FaultResult};
pub use rule::{FaultCondition, FaultErrorType, FaultInjectionRule, FaultSignal, ServerErrorResult};
pub use transport::FaultInjectingTransport;
