//! Admission middleware: authorization, validation, then rate limiting.
//!
//! Runs before any model resource is touched. Validated texts replace the
//! raw ones in the operation, so everything downstream sees normalized,
//! PHI-masked input. One rate-limit token is consumed per operation, for
//! both single and batch calls.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use assertion_core::{TextValidator, ValidText};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::rate_limit::RateLimiter;
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    validator: Arc<TextValidator>,
    limiter: Arc<RateLimiter>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(validator: Arc<TextValidator>, limiter: Arc<RateLimiter>) -> Self {
        Self { validator, limiter }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            validator: Arc::clone(&self.validator),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    validator: Arc<TextValidator>,
    limiter: Arc<RateLimiter>,
}

impl<S> AdmissionService<S> {
    fn admit(&self, op: Operation) -> Result<Operation, OperationError> {
        if !op.ctx().authorized {
            debug!(call_id = op.ctx().call_id, "Rejecting unauthorized operation");
            return Err(OperationError::Unauthorized);
        }

        let op = match op {
            Operation::Predict { ctx, text } => {
                let rewritten = self.validator.validate(&text)?.into_rewritten();
                Operation::Predict {
                    ctx,
                    text: rewritten.unwrap_or(text),
                }
            }
            Operation::PredictBatch { ctx, texts } => {
                let rewritten: Vec<_> = self
                    .validator
                    .validate_batch(&texts)?
                    .into_iter()
                    .map(ValidText::into_rewritten)
                    .collect();
                let texts = texts
                    .into_iter()
                    .zip(rewritten)
                    .map(|(original, rewritten)| rewritten.unwrap_or(original))
                    .collect();
                Operation::PredictBatch { ctx, texts }
            }
        };

        let ctx = op.ctx();
        let decision = self.limiter.check(&ctx.client_key);
        if !decision.allowed {
            warn!(
                client_key = %ctx.client_key,
                endpoint = ctx.endpoint.as_str(),
                limit = decision.limit,
                "Rate limit exceeded"
            );
            return Err(OperationError::RateLimitExceeded {
                limit: decision.limit,
                retry_after: decision.retry_after,
            });
        }

        Ok(op)
    }
}

impl<S> Service<Operation> for AdmissionService<S>
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
        match self.admit(op) {
            Ok(op) => Box::pin(self.inner.call(op)),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
