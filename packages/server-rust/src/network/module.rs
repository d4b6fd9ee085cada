//! Network module with deferred startup lifecycle.
//!
//! `new()` captures state, `start()` binds the TCP listener, and `serve()`
//! starts accepting connections. Binding before serving lets the binary log
//! the real port and begin loading the model before traffic arrives.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::auth::ApiKeyAuth;
use super::config::NetworkConfig;
use super::handlers::{
    health_handler, liveness_handler, metrics_handler, model_info_handler, predict_batch_handler,
    predict_handler, readiness_handler, resolve_caller, service_info_handler,
    system_metrics_handler, AppState,
};
use super::middleware::{build_http_layers, stamp_response_time};
use crate::service::AssertionService;

/// Assembles the axum router with all routes and middleware.
///
/// Routes:
/// - `GET /` -- service name, version, and route map
/// - `POST /predict` -- classify one sentence
/// - `POST /predict/batch` -- classify an explicit batch
/// - `GET /health` -- composite health JSON
/// - `GET /health/live` -- Kubernetes liveness probe
/// - `GET /health/ready` -- Kubernetes readiness probe
/// - `GET /metrics` -- Prometheus exposition
/// - `GET /model/info` -- loaded model description
/// - `GET /system/metrics` -- prediction counters with host memory and CPU
///
/// Only the prediction routes resolve a caller, so only they consult API keys.
pub fn build_router(state: AppState, config: &NetworkConfig) -> Router {
    let predict = Router::new()
        .route("/predict", post(predict_handler))
        .route("/predict/batch", post(predict_batch_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_caller));

    Router::new()
        .route("/", get(service_info_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/model/info", get(model_info_handler))
        .route("/system/metrics", get(system_metrics_handler))
        .merge(predict)
        .layer(middleware::from_fn(stamp_response_time))
        .layer(build_http_layers(config))
        .with_state(state)
}

/// Manages the HTTP server lifecycle.
pub struct NetworkModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, service: Arc<AssertionService>, auth: ApiKeyAuth) -> Self {
        Self {
            state: AppState {
                service,
                auth: Arc::new(auth),
                network: Arc::new(config),
            },
            listener: None,
        }
    }

    #[must_use]
    pub fn build_router(&self) -> Router {
        build_router(self.state.clone(), &self.state.network)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let host = &self.state.network.host;
        let listener = TcpListener::bind(format!("{host}:{}", self.state.network.port)).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {host}:{port}");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then lets in-flight
    /// requests finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        info!(auth_enabled = self.state.auth.is_enabled(), "Serving HTTP connections");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
