//! Innermost pipeline service: schedules texts for inference and maps the
//! raw model output into public results.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use assertion_core::{PredictionResult, RawPrediction, RequestId, ResultMapper};
use tower::Service;
use tracing::{debug, error};

use super::operation::{
    BatchResponse, ItemError, ItemOutcome, Operation, OperationError, OperationResponse,
};
use crate::batch::{BatchScheduler, SlotResult};
use crate::metrics::MetricsRegistry;

/// Single texts go through the micro-batch coalescer; explicit batches are
/// sent to the engine as one call.
#[derive(Clone)]
pub struct ClassifyService {
    scheduler: Arc<BatchScheduler>,
    mapper: Arc<ResultMapper>,
    metrics: Arc<MetricsRegistry>,
}

impl ClassifyService {
    #[must_use]
    pub fn new(
        scheduler: Arc<BatchScheduler>,
        mapper: Arc<ResultMapper>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            scheduler,
            mapper,
            metrics,
        }
    }

    async fn predict(self, request_id: RequestId, text: String) -> Result<OperationResponse, OperationError> {
        let started = Instant::now();
        let raw = self.scheduler.submit_single(text).await?;
        let result = self.map(raw, request_id, started.elapsed())?;
        Ok(OperationResponse::Prediction(result))
    }

    async fn predict_batch(
        self,
        request_id: RequestId,
        texts: Vec<String>,
    ) -> Result<OperationResponse, OperationError> {
        let started = Instant::now();
        let batch = self.scheduler.submit_batch(texts).await?;
        let batch_size = batch.outcomes.len();
        let per_item = batch.elapsed / u32::try_from(batch_size.max(1)).unwrap_or(u32::MAX);

        let predictions: Vec<ItemOutcome> = batch
            .outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| self.map_item(index, outcome, &request_id, per_item))
            .collect();
        let failed = predictions.iter().filter(|p| p.is_failed()).count();

        debug!(
            request_id = %request_id,
            batch_size,
            failed,
            "Batch prediction complete"
        );

        Ok(OperationResponse::Batch(BatchResponse {
            predictions,
            batch_size,
            failed,
            total_latency: started.elapsed(),
            request_id,
        }))
    }

    fn map(
        &self,
        raw: RawPrediction,
        request_id: RequestId,
        latency: Duration,
    ) -> Result<PredictionResult, OperationError> {
        let result = self
            .mapper
            .map(raw, request_id, latency)
            .inspect_err(|err| error!(error = %err, "Model output violated the label contract"))?;
        self.metrics.record_prediction(result.label);
        Ok(result)
    }

    fn map_item(
        &self,
        index: usize,
        outcome: SlotResult,
        request_id: &RequestId,
        latency: Duration,
    ) -> ItemOutcome {
        let mapped = outcome
            .map_err(OperationError::from)
            .and_then(|raw| self.map(raw, request_id.clone(), latency));
        match mapped {
            Ok(result) => ItemOutcome::Predicted(result),
            Err(err) => ItemOutcome::Failed(ItemError {
                index,
                error: err.to_string(),
                kind: match err {
                    OperationError::Internal(_) => "model_error",
                    ref other => other.kind(),
                },
            }),
        }
    }
}

impl Service<Operation> for ClassifyService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let this = self.clone();
        match op {
            Operation::Predict { ctx, text } => Box::pin(this.predict(ctx.request_id, text)),
            Operation::PredictBatch { ctx, texts } => {
                Box::pin(this.predict_batch(ctx.request_id, texts))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assertion_core::AssertionLabel;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::{InferenceEngine, ItemResult, ModelInfo};
    use crate::service::config::{BatchConfig, EngineConfig};
    use crate::service::operation::{Endpoint, OperationContext};
    use crate::traits::{ModelCapability, ModelError};

    /// Labels by keyword so each branch can be reached deterministically.
    struct KeywordModel;

    impl ModelCapability for KeywordModel {
        fn load(&self) -> anyhow::Result<ModelInfo> {
            Ok(ModelInfo {
                model_name: "keyword".to_string(),
                device: "cpu".to_string(),
                labels: vec!["LABEL_0".to_string(), "LABEL_1".to_string()],
            })
        }

        fn classify_batch(&self, texts: &[String]) -> Vec<ItemResult> {
            texts
                .iter()
                .map(|t| {
                    if t.contains("fail") {
                        Err(ModelError::new("flagged by stub"))
                    } else if t.contains("weird") {
                        Ok(RawPrediction::new("CONDITIONAL", 0.7))
                    } else if t.contains("denies") {
                        Ok(RawPrediction::new("LABEL_1", 0.97))
                    } else {
                        Ok(RawPrediction::new("LABEL_0", 0.8))
                    }
                })
                .collect()
        }
    }

    async fn service() -> (ClassifyService, Arc<MetricsRegistry>) {
        let engine = Arc::new(InferenceEngine::new(Arc::new(KeywordModel), EngineConfig::default()));
        engine.load().await;
        let scheduler = Arc::new(BatchScheduler::start(engine, BatchConfig::default()));
        let metrics = Arc::new(MetricsRegistry::default());
        let svc = ClassifyService::new(scheduler, Arc::new(ResultMapper::default()), Arc::clone(&metrics));
        (svc, metrics)
    }

    fn ctx(endpoint: Endpoint) -> OperationContext {
        OperationContext::new(7, RequestId::from_external("req-7"), endpoint, "client", 5000)
    }

    #[tokio::test]
    async fn single_prediction_is_mapped_and_counted() {
        let (svc, metrics) = service().await;
        let op = Operation::Predict {
            ctx: ctx(Endpoint::Predict),
            text: "The patient denies chest pain.".to_string(),
        };

        let OperationResponse::Prediction(result) = svc.oneshot(op).await.unwrap() else {
            panic!("expected a single prediction");
        };
        assert_eq!(result.label, AssertionLabel::Absent);
        assert!(result.score > 0.9);
        assert_eq!(result.request_id.as_str(), "req-7");
        assert_eq!(metrics.snapshot().predictions_for(AssertionLabel::Absent), 1);
    }

    #[tokio::test]
    async fn unknown_label_on_single_is_a_contract_error() {
        let (svc, metrics) = service().await;
        let op = Operation::Predict {
            ctx: ctx(Endpoint::Predict),
            text: "weird finding".to_string(),
        };

        let err = svc.oneshot(op).await.unwrap_err();
        assert!(matches!(err, OperationError::UnknownModelLabel { raw_label } if raw_label == "CONDITIONAL"));
        assert_eq!(metrics.snapshot().total_predictions(), 0);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_marks_failures() {
        let (svc, _) = service().await;
        let op = Operation::PredictBatch {
            ctx: ctx(Endpoint::PredictBatch),
            texts: vec![
                "Cough present.".to_string(),
                "please fail".to_string(),
                "Patient denies fever.".to_string(),
                "weird finding".to_string(),
            ],
        };

        let OperationResponse::Batch(batch) = svc.oneshot(op).await.unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.batch_size, 4);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.predictions[0].prediction().unwrap().label, AssertionLabel::Present);
        assert!(matches!(
            &batch.predictions[1],
            ItemOutcome::Failed(ItemError { index: 1, kind: "model_error", .. })
        ));
        assert_eq!(batch.predictions[2].prediction().unwrap().label, AssertionLabel::Absent);
        assert!(matches!(
            &batch.predictions[3],
            ItemOutcome::Failed(ItemError { index: 3, kind: "unknown_model_label", .. })
        ));
        assert!(batch.total_latency >= batch.predictions[0].prediction().unwrap().latency);
    }
}
