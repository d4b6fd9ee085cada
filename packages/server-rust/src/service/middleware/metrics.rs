//! Metrics middleware for operations.
//!
//! Wraps every operation in a `tracing` span and records its outcome into the
//! [`MetricsRegistry`]: the request counter and latency histogram for every
//! outcome, and the classify-call error window for everything that is not a
//! client fault. Completed batches count per text; a batch that failed as a
//! whole counts as one failed call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::metrics::MetricsRegistry;
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    registry: Arc<MetricsRegistry>,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    registry: Arc<MetricsRegistry>,
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let endpoint = op.ctx().endpoint;
        let call_id = op.ctx().call_id;
        let items = op.len() as u64;

        let span = info_span!(
            "operation",
            endpoint = endpoint.as_str(),
            call_id = call_id,
            request_id = %op.ctx().request_id,
            batch_size = items,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let registry = Arc::clone(&self.registry);
        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let (status, outcome) = match &result {
                    Ok(response) => {
                        let (ok, failed) = match response {
                            OperationResponse::Prediction(_) => (1, 0),
                            OperationResponse::Batch(batch) => {
                                let failed = batch.failed as u64;
                                (batch.batch_size as u64 - failed, failed)
                            }
                        };
                        registry.record_inference(ok, failed);
                        (200, "ok")
                    }
                    Err(err) => {
                        if !err.is_client_fault() {
                            registry.record_inference(0, 1);
                        }
                        (err.status_code(), err.kind())
                    }
                };
                registry.record_request(endpoint, status, elapsed);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::info!(
                    endpoint = endpoint.as_str(),
                    call_id = call_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "operation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assertion_core::{AssertionLabel, PredictionResult, RequestId};
    use tower::ServiceExt;

    use super::*;
    use crate::metrics::{ErrorRate, StatusClass};
    use crate::service::operation::{Endpoint, OperationContext};

    /// Service that answers from a fixed script.
    #[derive(Clone)]
    struct ScriptedService {
        fail_with: Option<fn() -> OperationError>,
    }

    impl Service<Operation> for ScriptedService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let fail_with = self.fail_with;
            let request_id = op.ctx().request_id.clone();
            Box::pin(async move {
                if let Some(make_err) = fail_with {
                    return Err(make_err());
                }
                Ok(OperationResponse::Prediction(PredictionResult {
                    label: AssertionLabel::Present,
                    score: 0.8,
                    raw_label: "LABEL_0".to_string(),
                    latency: std::time::Duration::from_millis(1),
                    request_id,
                }))
            })
        }
    }

    fn make_op() -> Operation {
        let ctx = OperationContext::new(
            42,
            RequestId::from_external("req-42"),
            Endpoint::Predict,
            "client",
            5000,
        );
        Operation::Predict {
            ctx,
            text: "No fever.".to_string(),
        }
    }

    #[tokio::test]
    async fn success_is_counted_and_passed_through() {
        let registry = Arc::new(MetricsRegistry::default());
        let svc = MetricsLayer::new(Arc::clone(&registry)).layer(ScriptedService { fail_with: None });

        let resp = svc.oneshot(make_op()).await.unwrap();
        assert!(matches!(resp, OperationResponse::Prediction(_)));

        let snap = registry.snapshot();
        assert_eq!(snap.requests_for(Endpoint::Predict, StatusClass::Success), 1);
        assert_eq!(snap.recent, ErrorRate { failed: 0, total: 1 });
    }

    #[tokio::test]
    async fn client_faults_stay_out_of_error_rate() {
        let registry = Arc::new(MetricsRegistry::default());
        let svc = MetricsLayer::new(Arc::clone(&registry)).layer(ScriptedService {
            fail_with: Some(|| OperationError::Unauthorized),
        });

        let err = svc.oneshot(make_op()).await.unwrap_err();
        assert!(matches!(err, OperationError::Unauthorized));

        let snap = registry.snapshot();
        assert_eq!(snap.requests_for(Endpoint::Predict, StatusClass::ClientError), 1);
        assert_eq!(snap.recent.total, 0);
    }

    #[tokio::test]
    async fn server_faults_count_as_failed_calls() {
        let registry = Arc::new(MetricsRegistry::default());
        let svc = MetricsLayer::new(Arc::clone(&registry)).layer(ScriptedService {
            fail_with: Some(|| OperationError::ModelUnavailable {
                reason: "loading".to_string(),
            }),
        });

        let _ = svc.oneshot(make_op()).await.unwrap_err();

        let snap = registry.snapshot();
        assert_eq!(snap.requests_for(Endpoint::Predict, StatusClass::ServerError), 1);
        assert_eq!(snap.recent, ErrorRate { failed: 1, total: 1 });
    }

    #[tokio::test]
    async fn shed_batch_counts_as_one_failed_call() {
        let registry = Arc::new(MetricsRegistry::default());
        let svc = MetricsLayer::new(Arc::clone(&registry)).layer(ScriptedService {
            fail_with: Some(|| OperationError::Overloaded),
        });
        let ctx = OperationContext::new(
            43,
            RequestId::from_external("req-43"),
            Endpoint::PredictBatch,
            "client",
            5000,
        );
        let op = Operation::PredictBatch {
            ctx,
            texts: vec!["No fever.".to_string(); 50],
        };

        let err = svc.oneshot(op).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));

        let snap = registry.snapshot();
        assert_eq!(snap.requests_for(Endpoint::PredictBatch, StatusClass::ServerError), 1);
        assert_eq!(snap.recent, ErrorRate { failed: 1, total: 1 });
    }
}
