//! End-to-end deadline
//!
//! Bounds the whole logical operation, including retries, hedges and the
//! write barrier. Expiry drops every in-flight attempt and surfaces as a
//! timeout, distinct from caller cancellation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::client::context::RequestContext;
use crate::client::pipeline::{Next, OperationResult};
use crate::error::CosmosError;
use crate::observability::{log_event, ClientMetrics, Event};
use crate::operation::LogicalOperation;

use super::Middleware;

pub struct DeadlineMiddleware {
    /// Applies when the request options carry no timeout of their own
    default_timeout: Option<Duration>,
    metrics: Arc<ClientMetrics>,
}

impl DeadlineMiddleware {
    pub fn new(default_timeout: Option<Duration>, metrics: Arc<ClientMetrics>) -> Self {
        Self {
            default_timeout,
            metrics,
        }
    }
}

impl Middleware for DeadlineMiddleware {
    fn process<'a>(
        &'a self,
        op: &'a LogicalOperation,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            let budget = match ctx.options.end_to_end_timeout.or(self.default_timeout) {
                Some(budget) => budget,
                None => return next.run(op, ctx).await,
            };

            match tokio::time::timeout(budget, next.run(op, ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    self.metrics.increment_timeouts();
                    let activity_id = ctx.activity_id.to_string();
                    log_event(
                        Event::OperationTimedOut,
                        &activity_id,
                        &format!("{} exceeded {}ms", op.name(), budget.as_millis()),
                    );
                    ctx.trace.add_datum("Timeout", budget.as_millis() as u64);
                    Err(CosmosError::timeout(format!(
                        "operation did not complete within the end-to-end timeout of {}ms",
                        budget.as_millis()
                    ))
                    .with_diagnostics(ctx.diagnostics()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::pipeline::{OperationExecutor, PipelineBuilder};
    use crate::error::ErrorKind;
    use crate::operation::RequestOptions;
    use crate::routing::PartitionKey;
    use tokio_util::sync::CancellationToken;

    struct Slow;

    impl OperationExecutor for Slow {
        fn execute<'a>(
            &'a self,
            _op: &'a LogicalOperation,
            _ctx: &'a RequestContext,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(CosmosError::service_unavailable(0, "unreachable"))
            })
        }
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_default() {
        let metrics = Arc::new(ClientMetrics::new());
        let pipeline = PipelineBuilder::new()
            .with(DeadlineMiddleware::new(Some(Duration::from_secs(30)), metrics.clone()))
            .build(Slow);

        let op = LogicalOperation::read_item("c", PartitionKey::from("pk"), "1");
        let options = RequestOptions::new().with_end_to_end_timeout(Duration::from_millis(50));
        let ctx = RequestContext::new(&op, options, CancellationToken::new());

        let started = std::time::Instant::now();
        let err = pipeline.execute(&op, ctx).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.status_code(), 408);
        assert!(err.diagnostics.is_some());
        assert_eq!(metrics.snapshot().timeouts, 1);
    }
}
