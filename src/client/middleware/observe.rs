//! Observability Middleware
//!
//! Logs every logical operation and keeps the client counters current. Also
//! guarantees that any error leaving the pipeline carries diagnostics.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::client::context::RequestContext;
use crate::client::pipeline::{Next, OperationResult};
use crate::error::ErrorKind;
use crate::observability::{log_event, ClientMetrics, Event};
use crate::operation::LogicalOperation;

use super::Middleware;

pub struct ObserveMiddleware {
    metrics: Arc<ClientMetrics>,
}

impl ObserveMiddleware {
    pub fn new(metrics: Arc<ClientMetrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for ObserveMiddleware {
    fn process<'a>(
        &'a self,
        op: &'a LogicalOperation,
        ctx: &'a mut RequestContext,
        next: Next<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            let activity_id = ctx.activity_id.to_string();
            self.metrics.increment_operations();
            log_event(Event::OperationBegin, &activity_id, &op.to_string());

            let result = next.run(op, ctx).await;
            let elapsed_ms = ctx.elapsed_ms();

            match result {
                Ok(response) => {
                    debug!(
                        activity_id = %activity_id,
                        status = response.status,
                        sub_status = response.sub_status,
                        request_charge = response.request_charge,
                        elapsed_ms = elapsed_ms as u64,
                        "operation complete"
                    );
                    log_event(Event::OperationComplete, &activity_id, &op.name());
                    Ok(response)
                }
                Err(err) => {
                    self.metrics.increment_operations_failed();
                    let event = match err.kind {
                        ErrorKind::Cancelled => {
                            self.metrics.increment_cancellations();
                            Event::OperationCancelled
                        }
                        _ => Event::OperationFailed,
                    };
                    log_event(
                        event,
                        &activity_id,
                        &format!("{} failed after {}ms: {}", op.name(), elapsed_ms, err),
                    );

                    if err.diagnostics.is_some() {
                        Err(err)
                    } else {
                        Err(err.with_diagnostics(ctx.diagnostics()))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::pipeline::{OperationExecutor, PipelineBuilder};
    use crate::error::CosmosError;
    use crate::operation::RequestOptions;
    use crate::routing::PartitionKey;
    use tokio_util::sync::CancellationToken;

    struct Failing(ErrorKind);

    impl OperationExecutor for Failing {
        fn execute<'a>(
            &'a self,
            _op: &'a LogicalOperation,
            _ctx: &'a RequestContext,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                Err(match self.0 {
                    ErrorKind::Cancelled => CosmosError::cancelled("cancelled"),
                    _ => CosmosError::service_unavailable(0, "down"),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_get_diagnostics() {
        let metrics = Arc::new(ClientMetrics::new());
        let pipeline = PipelineBuilder::new()
            .with(ObserveMiddleware::new(metrics.clone()))
            .build(Failing(ErrorKind::Cancelled));

        let op = LogicalOperation::read_item("c", PartitionKey::from("pk"), "1");
        let ctx = RequestContext::new(&op, RequestOptions::new(), CancellationToken::new());
        let err = pipeline.execute(&op, ctx).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(err.diagnostics.is_some());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations, 1);
        assert_eq!(snapshot.operations_failed, 1);
        assert_eq!(snapshot.cancellations, 1);
    }
}
