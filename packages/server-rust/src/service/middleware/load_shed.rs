//! Concurrency cap for predictions.
//!
//! Once `max_concurrent_operations` predictions are in flight, new ones fail
//! with `OperationError::Overloaded` before validation, rate limiting, or model
//! work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// One semaphore permit per in-flight prediction, shared by every service
/// the layer builds.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Operations that could start right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Operation> for LoadShedService<S>
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
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            warn!(
                endpoint = op.ctx().endpoint.as_str(),
                call_id = op.ctx().call_id,
                "Shedding operation, concurrency limit reached"
            );
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(op);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertion_core::RequestId;
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{BatchResponse, Endpoint, OperationContext};

    /// Answers an empty batch after `delay_ms`.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Operation> for SlowService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            let request_id = op.ctx().request_id.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Batch(BatchResponse {
                    predictions: Vec::new(),
                    batch_size: 0,
                    failed: 0,
                    total_latency: Duration::from_millis(delay),
                    request_id,
                }))
            })
        }
    }

    fn make_op() -> Operation {
        let ctx = OperationContext::new(
            1,
            RequestId::from_external("req-1"),
            Endpoint::PredictBatch,
            "client",
            5000,
        );
        Operation::PredictBatch {
            ctx,
            texts: vec!["No fever.".to_string()],
        }
    }

    #[tokio::test]
    async fn allows_operations_under_limit() {
        let layer = LoadShedLayer::new(10);
        let svc = layer.layer(SlowService { delay_ms: 1 });
        let resp = svc.oneshot(make_op()).await.unwrap();
        assert!(matches!(resp, OperationResponse::Batch(_)));
        assert_eq!(layer.available(), 10);
    }

    #[tokio::test]
    async fn rejects_when_overloaded() {
        let layer = LoadShedLayer::new(1);
        let mut svc = layer.layer(SlowService { delay_ms: 500 });

        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let in_flight = tokio::spawn({
            let fut = svc.call(make_op());
            async move { fut.await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(layer.available(), 0);

        let err = svc.call(make_op()).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));

        assert!(in_flight.await.unwrap().is_ok());
        assert_eq!(layer.available(), 1);
    }
}
