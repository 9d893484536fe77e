//! Availability strategy
//!
//! Optional cross-region hedging for document reads. With hedging disabled, or
//! for any other operation, requests go to the most preferred region and rely
//! on the retry engine alone.

mod hedging;
mod strategy;

pub use hedging::{execute_hedged, FailedRegions, RacerStart};
pub use strategy::{AvailabilityStrategy, HedgingConfig};
