//! End-to-end scenarios against `AssertionService` with stub models.

use std::sync::Arc;
use std::time::Duration;

use assertion_core::{AssertionLabel, BatchPredictionRequest, PredictionRequest, RawPrediction};
use assertion_server::engine::{ItemResult, ModelInfo};
use assertion_server::metrics::StatusClass;
use assertion_server::service::config::RateLimitConfig;
use assertion_server::service::{Endpoint, ItemOutcome};
use assertion_server::{
    AssertionService, CallerContext, HealthSnapshot, HealthStatus, LexiconModel, ModelCapability,
    ModelError, OperationError, ServerConfig, StaticPressure,
};

// ---------------------------------------------------------------------------
// Stub models
// ---------------------------------------------------------------------------

fn info(name: &str) -> ModelInfo {
    ModelInfo {
        model_name: name.to_string(),
        device: "cpu".to_string(),
        labels: vec![
            "LABEL_0".to_string(),
            "LABEL_1".to_string(),
            "LABEL_2".to_string(),
        ],
    }
}

/// Always answers ABSENT with high confidence.
struct FixedAbsentModel;

impl ModelCapability for FixedAbsentModel {
    fn load(&self) -> anyhow::Result<ModelInfo> {
        Ok(info("fixed-absent"))
    }

    fn classify_batch(&self, texts: &[String]) -> Vec<ItemResult> {
        texts
            .iter()
            .map(|_| Ok(RawPrediction::new("LABEL_1", 0.97)))
            .collect()
    }
}

/// Fails any text containing `FAIL`; otherwise answers PRESENT.
struct FlaggingModel;

impl ModelCapability for FlaggingModel {
    fn load(&self) -> anyhow::Result<ModelInfo> {
        Ok(info("flagging"))
    }

    fn classify_batch(&self, texts: &[String]) -> Vec<ItemResult> {
        texts
            .iter()
            .map(|t| {
                if t.contains("FAIL") {
                    Err(ModelError::new("flagged input"))
                } else {
                    Ok(RawPrediction::new("LABEL_0", 0.88))
                }
            })
            .collect()
    }
}

async fn ready_service(model: Arc<dyn ModelCapability>, config: ServerConfig) -> AssertionService {
    let svc = AssertionService::new(model, Arc::new(StaticPressure::default()), config);
    assert!(svc.load_model().await, "stub model should load");
    svc
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn denied_chest_pain_is_absent() {
    let svc = ready_service(Arc::new(FixedAbsentModel), ServerConfig::default()).await;

    let result = svc
        .predict(
            PredictionRequest::new("The patient denies chest pain."),
            CallerContext::anonymous(),
        )
        .await
        .unwrap();
    assert_eq!(result.label, AssertionLabel::Absent);
    assert!(result.score > 0.9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_predicts_share_one_bucket() {
    let config = ServerConfig {
        rate_limit: RateLimitConfig {
            capacity: 100,
            refill_amount: 0,
            ..RateLimitConfig::default()
        },
        ..ServerConfig::default()
    };
    let svc = Arc::new(ready_service(Arc::new(FixedAbsentModel), config).await);

    let handles: Vec<_> = (0..150)
        .map(|i| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.predict(
                    PredictionRequest::new(format!("No fever on day {i}.")),
                    CallerContext::anonymous().with_client_key("shared-client"),
                )
                .await
            })
        })
        .collect();

    let mut ok = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(OperationError::RateLimitExceeded { limit: 100, .. }) => limited += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 100);
    assert_eq!(limited, 50);

    let snap = svc.metrics();
    assert_eq!(snap.requests_for(Endpoint::Predict, StatusClass::Success), 100);
    assert_eq!(snap.requests_for(Endpoint::Predict, StatusClass::ClientError), 50);
    assert_eq!(snap.total_predictions(), 100);
    assert_eq!(snap.recent.total, 100);
    assert_eq!(snap.recent.failed, 0);
}

#[tokio::test]
async fn batch_with_one_failing_item_keeps_order() {
    let svc = ready_service(Arc::new(FlaggingModel), ServerConfig::default()).await;
    let texts = vec![
        "Cough present.".to_string(),
        "FAIL this one.".to_string(),
        "Fever present.".to_string(),
    ];

    let batch = svc
        .predict_batch(BatchPredictionRequest::new(texts), CallerContext::anonymous())
        .await
        .unwrap();
    assert_eq!(batch.predictions.len(), 3);
    assert_eq!(batch.failed, 1);

    assert!(batch.predictions[0].prediction().is_some());
    match &batch.predictions[1] {
        ItemOutcome::Failed(err) => {
            assert_eq!(err.index, 1);
            assert_eq!(err.kind, "model_error");
        }
        ItemOutcome::Predicted(_) => panic!("flagged item must fail"),
    }
    let last = batch.predictions[2].prediction().unwrap();
    assert_eq!(last.label, AssertionLabel::Present);
    assert!((0.0..=1.0).contains(&last.score));

    let snap = svc.metrics();
    assert_eq!(snap.recent.total, 3);
    assert_eq!(snap.recent.failed, 1);
}

#[tokio::test]
async fn batch_results_match_input_length_and_order() {
    let svc = ready_service(Arc::new(LexiconModel::new()), ServerConfig::default()).await;
    let cycle = [
        ("Cough present.", AssertionLabel::Present),
        ("No fever.", AssertionLabel::Absent),
        ("Possible pneumonia.", AssertionLabel::Possible),
    ];

    for size in 1..=100 {
        let texts: Vec<String> = (0..size)
            .map(|i| cycle[i % cycle.len()].0.to_string())
            .collect();
        let batch = svc
            .predict_batch(
                BatchPredictionRequest::new(texts),
                CallerContext::anonymous().with_client_key(format!("client-{size}")),
            )
            .await
            .unwrap();

        assert_eq!(batch.batch_size, size);
        assert_eq!(batch.predictions.len(), size);
        for (i, outcome) in batch.predictions.iter().enumerate() {
            let prediction = outcome.prediction().unwrap();
            assert_eq!(prediction.label, cycle[i % cycle.len()].1, "size {size} index {i}");
        }
    }
}

#[tokio::test]
async fn every_prediction_is_a_canonical_label_with_probability() {
    let svc = ready_service(Arc::new(LexiconModel::new()), ServerConfig::default()).await;
    let sentences = [
        "The patient denies chest pain.",
        "Mild cough, possibly viral.",
        "Chest X-ray shows consolidation.",
        "Negative for pulmonary embolism.",
        "Cannot exclude early appendicitis.",
        "Blood pressure 120/80.",
    ];
    for text in sentences {
        let result = svc
            .predict(PredictionRequest::new(text), CallerContext::anonymous())
            .await
            .unwrap();
        assert!(AssertionLabel::ALL.contains(&result.label));
        assert!((0.0..=1.0).contains(&result.score), "{text}: {}", result.score);
    }
}

#[tokio::test]
async fn not_ready_is_unhealthy_regardless_of_other_signals() {
    let pressure = Arc::new(StaticPressure::new(false));
    let svc = AssertionService::new(
        Arc::new(FixedAbsentModel),
        Arc::clone(&pressure) as Arc<dyn assertion_server::SystemPressure>,
        ServerConfig::default(),
    );

    assert_eq!(svc.health().status, HealthStatus::Unhealthy);
    pressure.set(true);
    assert_eq!(svc.health().status, HealthStatus::Unhealthy);

    svc.load_model().await;
    assert_eq!(svc.health().status, HealthStatus::Degraded);
    pressure.set(false);
    assert_eq!(svc.health().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn snapshots_are_stable_without_traffic() {
    let svc = ready_service(Arc::new(FixedAbsentModel), ServerConfig::default()).await;
    svc.predict(PredictionRequest::new("No fever."), CallerContext::anonymous())
        .await
        .unwrap();

    // Uptime always advances; every other field must match.
    let first = svc.health();
    let second = svc.health();
    assert!(second.uptime >= first.uptime);
    assert_eq!(
        HealthSnapshot { uptime: Duration::ZERO, ..first },
        HealthSnapshot { uptime: Duration::ZERO, ..second }
    );

    let before = svc.metrics();
    let after = svc.metrics();
    assert!(after.uptime >= before.uptime);
    assert_eq!(before.total_predictions(), after.total_predictions());
    assert_eq!(before.predictions, after.predictions);
    assert_eq!(before.recent, after.recent);
    assert_eq!(before.inference_ok, after.inference_ok);
    assert_eq!(before.inference_failed, after.inference_failed);
    for endpoint in Endpoint::ALL {
        for class in [StatusClass::Success, StatusClass::ClientError, StatusClass::ServerError] {
            assert!(after.requests_for(endpoint, class) >= before.requests_for(endpoint, class));
        }
    }
}

#[tokio::test]
async fn model_failure_to_load_keeps_service_unavailable() {
    struct BrokenModel;

    impl ModelCapability for BrokenModel {
        fn load(&self) -> anyhow::Result<ModelInfo> {
            anyhow::bail!("weights not found")
        }

        fn classify_batch(&self, texts: &[String]) -> Vec<ItemResult> {
            texts.iter().map(|_| Err(ModelError::new("unreachable"))).collect()
        }
    }

    let svc = AssertionService::new(
        Arc::new(BrokenModel),
        Arc::new(StaticPressure::default()),
        ServerConfig::default(),
    );
    assert!(!svc.load_model().await);
    assert!(!svc.is_ready());

    let err = svc
        .predict(PredictionRequest::new("No fever."), CallerContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::ModelUnavailable { .. }));
    assert_eq!(err.status_code(), 503);
    assert_eq!(svc.health().status, HealthStatus::Unhealthy);
}
