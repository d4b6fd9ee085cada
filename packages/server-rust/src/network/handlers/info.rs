//! `GET /`: service name, version, status, and the route map.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

pub const SERVICE_NAME: &str = "Clinical Assertion API";

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub model: Option<String>,
    pub environment: String,
    /// `healthy` once the model is loaded, `initializing` before.
    pub status: &'static str,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub predict: &'static str,
    pub batch_predict: &'static str,
    pub model_info: &'static str,
    pub metrics: &'static str,
    pub system_metrics: &'static str,
}

const ENDPOINTS: Endpoints = Endpoints {
    health: "/health",
    predict: "/predict",
    batch_predict: "/predict/batch",
    model_info: "/model/info",
    metrics: "/metrics",
    system_metrics: "/system/metrics",
};

pub async fn service_info_handler(State(state): State<AppState>) -> Json<ServiceInfo> {
    let model = state.service.engine().model_info().map(|info| info.model_name);
    let status = if model.is_some() { "healthy" } else { "initializing" };
    Json(ServiceInfo {
        name: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        description: "Assertion classification for clinical sentences",
        model,
        environment: state.network.environment.clone(),
        status,
        endpoints: ENDPOINTS,
    })
}
