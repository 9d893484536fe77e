//! Simulated service
//!
//! An in-memory multi-region account that stands in for both the transport
//! and the address source. Used by the integration tests and for local runs
//! together with `fault::FaultInjectingTransport`.

mod account;
mod store;

pub use account::{RequestRecord, SimulatedAccount};
