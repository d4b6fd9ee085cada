//! HTTP handler definitions for the assertion server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors), the JSON error envelope, and the caller-resolution
//! middleware applied to prediction routes.

pub mod health;
pub mod info;
pub mod metrics;
pub mod predict;

pub use health::{health_handler, liveness_handler, model_info_handler, readiness_handler};
pub use info::service_info_handler;
pub use metrics::{metrics_handler, system_metrics_handler};
pub use predict::{predict_batch_handler, predict_handler};

use std::net::SocketAddr;
use std::sync::Arc;

use assertion_core::RequestId;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use super::auth::{client_key, presented_key, ApiKeyAuth};
use super::config::NetworkConfig;
use crate::service::{AssertionService, CallerContext, OperationError};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AssertionService>,
    pub auth: Arc<ApiKeyAuth>,
    pub network: Arc<NetworkConfig>,
}

/// Resolves identity and authorization for a prediction request and stores
/// the resulting [`CallerContext`] as a request extension.
///
/// Never rejects: an unauthorized caller is refused by the operation
/// pipeline, so the refusal is counted like any other outcome.
pub async fn resolve_caller(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let headers = request.headers();
    let presented = presented_key(headers);

    let caller = CallerContext {
        client_key: client_key(presented, headers, peer, state.network.trust_forwarded),
        authorized: state.auth.authorize(presented),
        request_id: request_id(headers),
    };
    request.extensions_mut().insert(caller);
    next.run(request).await
}

/// The `X-Request-Id` assigned by the HTTP layers, if any.
#[must_use]
pub fn request_id(headers: &HeaderMap) -> Option<RequestId> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(RequestId::from_external)
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Failure response: `{"error", "status_code", "request_id"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    request_id: Option<RequestId>,
    rate_limit: Option<RateLimitHeaders>,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitHeaders {
    limit: u32,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    #[must_use]
    pub fn from_operation(err: &OperationError, request_id: Option<RequestId>) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match err {
            OperationError::Internal(source) => {
                error!(error = %source, request_id = ?request_id, "Prediction failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let rate_limit = match err {
            OperationError::RateLimitExceeded { limit, retry_after } => Some(RateLimitHeaders {
                limit: *limit,
                retry_after_secs: retry_after.map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0)),
            }),
            _ => None,
        };
        Self {
            status,
            message,
            request_id,
            rate_limit,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>, request_id: Option<RequestId>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            request_id,
            rate_limit: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status_code": self.status.as_u16(),
            "request_id": self.request_id,
        }));
        let mut response = (self.status, body).into_response();

        if let Some(rl) = self.rate_limit {
            let headers = response.headers_mut();
            headers.insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(rl.limit),
            );
            headers.insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from_static("0"),
            );
            if let Some(secs) = rl.retry_after_secs {
                headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
