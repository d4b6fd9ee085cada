//! `POST /predict` and `POST /predict/batch`.

use assertion_core::{BatchPredictionRequest, PredictionRequest, PredictionResult};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::service::{BatchResponse, CallerContext};

#[derive(Debug, Deserialize)]
pub struct PredictBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchBody {
    pub texts: Vec<String>,
}

pub async fn predict_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<PredictBody>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let request_id = caller.request_id.clone();
    let Json(body) =
        body.map_err(|rej| ApiError::bad_request(rej.body_text(), request_id.clone()))?;

    state
        .service
        .predict(PredictionRequest::new(body.text), caller)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_operation(&err, request_id))
}

pub async fn predict_batch_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    body: Result<Json<PredictBatchBody>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let request_id = caller.request_id.clone();
    let Json(body) =
        body.map_err(|rej| ApiError::bad_request(rej.body_text(), request_id.clone()))?;

    state
        .service
        .predict_batch(BatchPredictionRequest::new(body.texts), caller)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_operation(&err, request_id))
}
