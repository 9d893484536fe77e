//! Routing
//!
//! Everything needed to turn a logical operation into a physical destination:
//!
//! - `LocationCache` orders the account's regions by preference and health
//! - `PartitionRoutingMap` maps partition keys onto key ranges
//! - `AddressResolver` maps ranges onto replica addresses per region

mod errors;
mod location;
mod partition_key;
mod range;
mod region;
mod resolver;

pub use errors::{RoutingError, RoutingResult};
pub use location::{AccountProperties, LocationCache, DEFAULT_UNAVAILABILITY_TTL};
pub use partition_key::{PartitionKey, EPK_SPACE_END};
pub use range::{PartitionKeyRange, PartitionRoutingMap};
pub use region::Region;
pub use resolver::{AddressResolver, AddressSource, RefreshScope, ResolvedAddress};
