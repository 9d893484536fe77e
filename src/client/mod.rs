//! Client
//!
//! Entry point for callers. Operations flow through a middleware pipeline:
//!
//! - `ObserveMiddleware` logs and counts every operation
//! - `DeadlineMiddleware` enforces the end-to-end timeout
//! - `RequestExecutor` runs hedging, retries and the write barrier

pub mod context;
mod cosmos_client;
pub mod executor;
pub mod middleware;
pub mod pipeline;
pub mod response;

pub use context::RequestContext;
pub use cosmos_client::{CosmosClientBuilder, CosmosClientCore};
pub use executor::RequestExecutor;
pub use middleware::{DeadlineMiddleware, Middleware, ObserveMiddleware};
pub use pipeline::{Next, OperationExecutor, OperationResult, Pipeline, PipelineBuilder};
pub use response::OperationResponse;
