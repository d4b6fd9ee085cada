//! `AssertionService`: the public face of the prediction core.
//!
//! Owns every component, builds the operation pipeline once, and turns
//! incoming requests into [`Operation`]s with a fresh call ID and context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use assertion_core::{
    BatchPredictionRequest, PredictionRequest, PredictionResult, RequestId, ResultMapper,
    TextValidator,
};
use parking_lot::Mutex;
use tower::ServiceExt;
use tracing::{debug, info};

use super::classify::ClassifyService;
use super::config::ServerConfig;
use super::middleware::{build_operation_pipeline, OperationPipeline};
use super::operation::{
    BatchResponse, Endpoint, Operation, OperationContext, OperationError, OperationResponse,
};
use super::worker::BackgroundWorker;
use crate::batch::BatchScheduler;
use crate::engine::{InferenceEngine, ModelInfo};
use crate::health::{HealthMonitor, HealthSnapshot, SystemMetrics};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::rate_limit::{BucketSweeper, RateLimiter};
use crate::traits::{ModelCapability, SystemPressure};

/// Bucket key shared by callers with no identity.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Caller identity and authorization, as decided by the transport.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Rate-limit bucket key. Falls back to the request's `client_id`, then
    /// to [`ANONYMOUS_CLIENT`].
    pub client_key: Option<String>,
    pub authorized: bool,
    /// Correlation ID supplied by the caller; generated when absent.
    pub request_id: Option<RequestId>,
}

impl CallerContext {
    /// An authorized caller with no identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            client_key: None,
            authorized: true,
            request_id: None,
        }
    }

    #[must_use]
    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    #[must_use]
    pub fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

// ---------------------------------------------------------------------------
// AssertionService
// ---------------------------------------------------------------------------

pub struct AssertionService {
    config: Arc<ServerConfig>,
    engine: Arc<InferenceEngine>,
    scheduler: Arc<BatchScheduler>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsRegistry>,
    health: HealthMonitor,
    pipeline: OperationPipeline,
    sweeper: Mutex<Option<BackgroundWorker<BucketSweeper>>>,
    call_id_counter: AtomicU64,
}

impl AssertionService {
    /// Wires every component around `model`. The model is not loaded until
    /// [`AssertionService::load_model`] or [`AssertionService::spawn_model_load`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        model: Arc<dyn ModelCapability>,
        pressure: Arc<dyn SystemPressure>,
        config: ServerConfig,
    ) -> Self {
        let config = Arc::new(config);

        let mut validation = config.validation.clone();
        validation.max_batch_size = config.batch.max_batch_size;
        let validator = Arc::new(TextValidator::new(validation));

        let engine = Arc::new(InferenceEngine::new(model, config.engine.clone()));
        let scheduler = Arc::new(BatchScheduler::start(
            Arc::clone(&engine),
            config.batch.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let metrics = Arc::new(MetricsRegistry::new(config.health.window));
        let health = HealthMonitor::new(
            Arc::clone(&engine),
            Arc::clone(&metrics),
            pressure,
            config.health.clone(),
        );

        let classify = ClassifyService::new(
            Arc::clone(&scheduler),
            Arc::new(ResultMapper::default()),
            Arc::clone(&metrics),
        );
        let pipeline = build_operation_pipeline(
            classify,
            validator,
            Arc::clone(&limiter),
            Arc::clone(&metrics),
            &config,
        );

        let sweeper = config.rate_limit.enabled.then(|| {
            BackgroundWorker::start(
                BucketSweeper::new(Arc::clone(&limiter)),
                config.rate_limit.sweep_interval,
            )
        });

        Self {
            config,
            engine,
            scheduler,
            limiter,
            metrics,
            health,
            pipeline,
            sweeper: Mutex::new(sweeper),
            call_id_counter: AtomicU64::new(1),
        }
    }

    /// Loads the model; see [`InferenceEngine::load`].
    pub async fn load_model(&self) -> bool {
        self.engine.load().await
    }

    /// Loads the model on a background task.
    pub fn spawn_model_load(&self) -> tokio::task::JoinHandle<bool> {
        self.engine.spawn_load()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(
        &self,
        endpoint: Endpoint,
        caller: CallerContext,
        client_id: Option<&str>,
    ) -> OperationContext {
        let client_key = caller
            .client_key
            .or_else(|| client_id.map(str::to_string))
            .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());
        let mut ctx = OperationContext::new(
            self.next_call_id(),
            caller.request_id.unwrap_or_else(RequestId::generate),
            endpoint,
            client_key,
            self.config.default_operation_timeout_ms,
        );
        ctx.authorized = caller.authorized;
        ctx
    }

    /// Classifies one sentence.
    ///
    /// # Errors
    ///
    /// Admission failures (`Unauthorized`, `Validation`, `RateLimitExceeded`)
    /// never reach the model. Past admission the call fails with
    /// `ModelUnavailable`, `Overloaded`, `Timeout`, a label-contract error, or
    /// `Internal` when the model failed on this text.
    pub async fn predict(
        &self,
        request: PredictionRequest,
        caller: CallerContext,
    ) -> Result<PredictionResult, OperationError> {
        let ctx = self.make_ctx(Endpoint::Predict, caller, request.client_id());
        let op = Operation::Predict {
            ctx,
            text: request.into_text(),
        };
        match self.pipeline.clone().oneshot(op).await? {
            OperationResponse::Prediction(result) => Ok(result),
            OperationResponse::Batch(_) => {
                Err(anyhow::anyhow!("batch response to single prediction").into())
            }
        }
    }

    /// Classifies an explicit batch as one engine call.
    ///
    /// Per-item model or label failures are reported inside the response;
    /// the call itself only fails when the batch as a whole could not run.
    ///
    /// # Errors
    ///
    /// As [`AssertionService::predict`], with item-level validation failures
    /// rejecting the whole batch.
    pub async fn predict_batch(
        &self,
        request: BatchPredictionRequest,
        caller: CallerContext,
    ) -> Result<BatchResponse, OperationError> {
        let ctx = self.make_ctx(Endpoint::PredictBatch, caller, request.client_id());
        let op = Operation::PredictBatch {
            ctx,
            texts: request.into_texts(),
        };
        match self.pipeline.clone().oneshot(op).await? {
            OperationResponse::Batch(batch) => Ok(batch),
            OperationResponse::Prediction(_) => {
                Err(anyhow::anyhow!("single response to batch prediction").into())
            }
        }
    }

    /// Current composite health. Bypasses admission.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let started = Instant::now();
        let snapshot = self.health.snapshot();
        let status = if snapshot.status.is_serving() { 200 } else { 503 };
        self.metrics.record_request(Endpoint::Health, status, started.elapsed());
        snapshot
    }

    /// Current metrics. Bypasses admission.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let started = Instant::now();
        let snapshot = self.metrics.snapshot();
        self.metrics.record_request(Endpoint::Metrics, 200, started.elapsed());
        snapshot
    }

    /// Prediction counters with host memory and CPU usage.
    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        let started = Instant::now();
        let body = self.health.system_metrics();
        self.metrics
            .record_request(Endpoint::SystemMetrics, 200, started.elapsed());
        body
    }

    /// Description of the loaded model, once ready.
    #[must_use]
    pub fn model_info(&self) -> Option<ModelInfo> {
        let started = Instant::now();
        let info = self.engine.model_info();
        let status = if info.is_some() { 200 } else { 503 };
        self.metrics.record_request(Endpoint::ModelInfo, status, started.elapsed());
        info
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Stops the coalescing loop and the bucket sweeper.
    pub async fn shutdown(&self) {
        info!("Shutting down prediction service");
        self.scheduler.shutdown().await;
        let sweeper = self.sweeper.lock().take();
        if let Some(mut sweeper) = sweeper {
            sweeper.stop().await;
        }
        debug!("Prediction service stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assertion_core::AssertionLabel;

    use super::*;
    use crate::engine::LexiconModel;
    use crate::health::{HealthStatus, StaticPressure};
    use crate::metrics::StatusClass;
    use crate::service::config::RateLimitConfig;

    fn service(config: ServerConfig) -> AssertionService {
        AssertionService::new(
            Arc::new(LexiconModel::new()),
            Arc::new(StaticPressure::default()),
            config,
        )
    }

    #[tokio::test]
    async fn predict_before_load_fails_fast() {
        let svc = service(ServerConfig::default());
        let err = svc
            .predict(PredictionRequest::new("No fever."), CallerContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::ModelUnavailable { .. }));
        assert_eq!(svc.health().status, HealthStatus::Unhealthy);
        assert!(svc.model_info().is_none());
    }

    #[tokio::test]
    async fn predict_carries_caller_request_id() {
        let svc = service(ServerConfig::default());
        assert!(svc.load_model().await);

        let caller = CallerContext::anonymous().with_request_id(RequestId::from_external("req-abc"));
        let result = svc
            .predict(PredictionRequest::new("The patient denies chest pain."), caller)
            .await
            .unwrap();
        assert_eq!(result.label, AssertionLabel::Absent);
        assert_eq!(result.request_id.as_str(), "req-abc");

        let generated = svc
            .predict(PredictionRequest::new("Fever present."), CallerContext::anonymous())
            .await
            .unwrap();
        assert!(generated.request_id.as_str().starts_with("req-"));
        assert_ne!(generated.request_id.as_str(), "req-abc");
    }

    #[tokio::test]
    async fn client_id_selects_bucket_when_no_caller_key() {
        let config = ServerConfig {
            rate_limit: RateLimitConfig {
                capacity: 1,
                refill_amount: 0,
                ..RateLimitConfig::default()
            },
            ..ServerConfig::default()
        };
        let svc = service(config);
        svc.load_model().await;

        let request = || PredictionRequest::new("No fever.").with_client_id("ward-7");
        svc.predict(request(), CallerContext::anonymous()).await.unwrap();
        let err = svc.predict(request(), CallerContext::anonymous()).await.unwrap_err();
        assert!(matches!(err, OperationError::RateLimitExceeded { limit: 1, .. }));

        // A different identity has its own bucket.
        svc.predict(
            PredictionRequest::new("No fever."),
            CallerContext::anonymous().with_client_key("other"),
        )
        .await
        .unwrap();
        assert_eq!(svc.rate_limiter().bucket_count(), 2);
    }

    #[tokio::test]
    async fn unauthorized_caller_is_rejected() {
        let svc = service(ServerConfig::default());
        svc.load_model().await;
        let err = svc
            .predict(PredictionRequest::new("No fever."), CallerContext::anonymous().unauthorized())
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Unauthorized));
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn batch_over_limit_is_a_validation_error() {
        let svc = service(ServerConfig::default());
        svc.load_model().await;
        let texts = vec!["No fever.".to_string(); 101];
        let err = svc
            .predict_batch(BatchPredictionRequest::new(texts), CallerContext::anonymous())
            .await
            .unwrap_err();
        assert!(err.is_client_fault());
    }

    #[tokio::test]
    async fn health_and_metrics_requests_are_counted() {
        let svc = service(ServerConfig::default());
        svc.load_model().await;
        let _ = svc.health();
        let _ = svc.model_info();
        let _ = svc.system_metrics();
        let snap = svc.metrics();
        assert_eq!(snap.requests_for(Endpoint::Health, StatusClass::Success), 1);
        assert_eq!(snap.requests_for(Endpoint::ModelInfo, StatusClass::Success), 1);
        assert_eq!(snap.requests_for(Endpoint::SystemMetrics, StatusClass::Success), 1);
        // The metrics call itself is recorded after its snapshot.
        assert_eq!(
            svc.metrics().requests_for(Endpoint::Metrics, StatusClass::Success),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_closes_prediction_path() {
        let svc = service(ServerConfig::default());
        svc.load_model().await;
        svc.shutdown().await;
        let err = svc
            .predict(PredictionRequest::new("No fever."), CallerContext::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::ModelUnavailable { .. }));
    }
}
