//! Execution Pipeline
//!
//! Middleware chain in front of the request executor.
//! Order: Observe → Deadline → Execute

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::CosmosResult;
use crate::operation::LogicalOperation;

use super::context::RequestContext;
use super::middleware::Middleware;
use super::response::OperationResponse;

/// Result of an operation
pub type OperationResult = CosmosResult<OperationResponse>;

/// Next middleware in chain
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    executor: &'a dyn OperationExecutor,
}

impl<'a> Next<'a> {
    /// Run the next middleware or executor
    pub fn run(
        self,
        op: &'a LogicalOperation,
        ctx: &'a mut RequestContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            if let Some((first, rest)) = self.middleware.split_first() {
                let next = Next {
                    middleware: rest,
                    executor: self.executor,
                };
                first.process(op, ctx, next).await
            } else {
                self.executor.execute(op, ctx).await
            }
        })
    }
}

/// Final stage of the pipeline
pub trait OperationExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        op: &'a LogicalOperation,
        ctx: &'a RequestContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>>;
}

pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    executor: Arc<dyn OperationExecutor>,
}

impl Pipeline {
    pub fn new(executor: impl OperationExecutor + 'static) -> Self {
        Self {
            middleware: Vec::new(),
            executor: Arc::new(executor),
        }
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(m));
        self
    }

    /// Execute an operation through the pipeline
    pub async fn execute(&self, op: &LogicalOperation, mut ctx: RequestContext) -> OperationResult {
        let next = Next {
            middleware: &self.middleware,
            executor: self.executor.as_ref(),
        };
        next.run(op, &mut ctx).await
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }
}

/// Builder for pipeline construction
pub struct PipelineBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    pub fn with(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(m));
        self
    }

    pub fn build(self, executor: impl OperationExecutor + 'static) -> Pipeline {
        Pipeline {
            middleware: self.middleware,
            executor: Arc::new(executor),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::RequestOptions;
    use crate::routing::PartitionKey;
    use crate::transport::Headers;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct StatusExecutor(u16);

    impl OperationExecutor for StatusExecutor {
        fn execute<'a>(
            &'a self,
            _op: &'a LogicalOperation,
            ctx: &'a RequestContext,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                Ok(OperationResponse {
                    status: self.0,
                    sub_status: 0,
                    headers: Headers::new(),
                    payload: None,
                    request_charge: 0.0,
                    session_token: None,
                    region: None,
                    diagnostics: ctx.diagnostics(),
                })
            })
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Middleware for Counting {
        fn process<'a>(
            &'a self,
            op: &'a LogicalOperation,
            ctx: &'a mut RequestContext,
            next: Next<'a>,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                next.run(op, ctx).await
            })
        }
    }

    fn context(op: &LogicalOperation) -> RequestContext {
        RequestContext::new(op, RequestOptions::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_pipeline_runs_every_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = PipelineBuilder::new()
            .with(Counting(calls.clone()))
            .with(Counting(calls.clone()))
            .build(StatusExecutor(200));
        assert_eq!(pipeline.middleware_count(), 2);

        let op = LogicalOperation::read_item("c", PartitionKey::from("pk"), "1");
        let response = pipeline.execute(&op, context(&op)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_pipeline_reaches_executor() {
        let pipeline = Pipeline::new(StatusExecutor(404));
        let op = LogicalOperation::read_item("c", PartitionKey::from("pk"), "1");
        let response = pipeline.execute(&op, context(&op)).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(response.diagnostics.trace().duration().is_some());
    }
}
