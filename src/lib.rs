//! cosmos-core - request execution core for a multi-region document database client
//!
//! A logical operation enters through `CosmosClientCore`, passes the
//! middleware pipeline and is executed against one or more regions:
//!
//! - `routing` maps a partition key to a range and the range to replica addresses
//! - `session` tracks per-range progress for session consistency
//! - `retry` classifies failures and decides where the next attempt goes
//! - `availability` races the operation across regions when hedging is on
//! - `consistency` holds writes until enough regions have committed them
//! - `diagnostics` records every attempt in a trace handed back to the caller
//!
//! `transport` is the only seam to the network. `simulation` and `fault`
//! provide an in-memory account and fault injection behind that seam.

pub mod availability;
pub mod client;
pub mod config;
pub mod consistency;
pub mod diagnostics;
pub mod error;
pub mod fault;
pub mod observability;
pub mod operation;
pub mod retry;
pub mod routing;
pub mod session;
pub mod simulation;
pub mod transport;

pub use client::{CosmosClientBuilder, CosmosClientCore, OperationResponse};
pub use config::ClientConfig;
pub use diagnostics::CosmosDiagnostics;
pub use error::{CosmosError, CosmosResult, ErrorKind};
pub use operation::{ConsistencyLevel, LogicalOperation, RequestOptions};
pub use routing::{AccountProperties, PartitionKey, Region};
