//! Health, liveness, readiness, and model-info endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring. None of them
//! require an API key.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::engine::ModelInfo;
use crate::health::HealthSnapshot;

/// Composite health as JSON.
///
/// Returns 200 for HEALTHY and DEGRADED so a degraded instance keeps
/// receiving traffic, and 503 for UNHEALTHY.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.service.health();
    let status = if snapshot.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

/// Kubernetes liveness probe -- always returns 200 OK.
///
/// Only checks that the process is responsive. A failed liveness probe
/// triggers a restart, so model state is deliberately not consulted.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe -- 200 once the model is loaded, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.service.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Serialize)]
pub struct ModelInfoBody {
    pub loaded: bool,
    #[serde(flatten)]
    pub info: Option<ModelInfo>,
}

/// Description of the loaded model; 503 while it is not ready.
pub async fn model_info_handler(State(state): State<AppState>) -> (StatusCode, Json<ModelInfoBody>) {
    match state.service.model_info() {
        Some(info) => (
            StatusCode::OK,
            Json(ModelInfoBody {
                loaded: true,
                info: Some(info),
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ModelInfoBody {
                loaded: false,
                info: None,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::LexiconModel;
    use crate::health::{HealthStatus, StaticPressure};
    use crate::network::auth::ApiKeyAuth;
    use crate::network::config::NetworkConfig;
    use crate::service::{AssertionService, ServerConfig};

    fn test_state() -> AppState {
        AppState {
            service: Arc::new(AssertionService::new(
                Arc::new(LexiconModel::new()),
                Arc::new(StaticPressure::default()),
                ServerConfig::default(),
            )),
            auth: Arc::new(ApiKeyAuth::default()),
            network: Arc::new(NetworkConfig::default()),
        }
    }

    #[tokio::test]
    async fn health_handler_reports_unhealthy_before_load() {
        let state = test_state();
        let (status, Json(snapshot)) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert!(!snapshot.model_ready);
    }

    #[tokio::test]
    async fn health_handler_reports_healthy_after_load() {
        let state = test_state();
        state.service.load_model().await;
        let (status, Json(snapshot)) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        let status = liveness_handler().await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_handler_follows_model_state() {
        let state = test_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.service.load_model().await;
        assert_eq!(readiness_handler(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn model_info_body_flattens_info() {
        let state = test_state();
        let (status, Json(body)) = model_info_handler(State(state.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(serde_json::to_value(&body).unwrap(), serde_json::json!({"loaded": false}));

        state.service.load_model().await;
        let (status, Json(body)) = model_info_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["loaded"], true);
        assert_eq!(json["model_name"], "lexicon-assertion-v1");
    }
}
