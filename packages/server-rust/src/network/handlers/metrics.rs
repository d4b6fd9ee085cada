//! `GET /metrics` in the Prometheus text format, and `GET /system/metrics`
//! as JSON.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;
use crate::health::SystemMetrics;
use crate::metrics::exposition;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.service.metrics().render_prometheus();
    ([(CONTENT_TYPE, exposition::CONTENT_TYPE)], body)
}

pub async fn system_metrics_handler(State(state): State<AppState>) -> Json<SystemMetrics> {
    Json(state.service.system_metrics())
}
