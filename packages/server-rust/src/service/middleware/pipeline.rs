//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use assertion_core::TextValidator;
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::admission::AdmissionLayer;
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::metrics::MetricsRegistry;
use crate::rate_limit::RateLimiter;
use crate::service::classify::ClassifyService;
use crate::service::config::ServerConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};

/// The boxed, cloneable pipeline handed to callers.
pub type OperationPipeline = BoxCloneSyncService<Operation, OperationResponse, OperationError>;

/// Build the operation pipeline by wrapping the `ClassifyService` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record every outcome, including rejections by the layers below
/// 2. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 3. `AdmissionLayer` -- authorization, validation, then one rate-limit token
/// 4. `TimeoutLayer` -- enforce per-operation timeouts on the model path
#[must_use]
pub fn build_operation_pipeline(
    classify: ClassifyService,
    validator: Arc<TextValidator>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsRegistry>,
    config: &ServerConfig,
) -> OperationPipeline {
    let stack = ServiceBuilder::new()
        .layer(MetricsLayer::new(metrics))
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(AdmissionLayer::new(validator, limiter))
        .layer(TimeoutLayer)
        .service(classify);
    BoxCloneSyncService::new(stack)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
