//! Operation types carried through the prediction pipeline.

use std::time::Duration;

use assertion_core::{durations, MappingError, PredictionResult, RequestId, ValidationError};
use serde::Serialize;

use crate::batch::{BatchError, SlotError};
use crate::engine::EngineError;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Public entry point a call arrived through. Used as a metrics dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Predict,
    PredictBatch,
    Health,
    Metrics,
    ModelInfo,
    SystemMetrics,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Predict,
        Endpoint::PredictBatch,
        Endpoint::Health,
        Endpoint::Metrics,
        Endpoint::ModelInfo,
        Endpoint::SystemMetrics,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::Predict => "predict",
            Endpoint::PredictBatch => "predict_batch",
            Endpoint::Health => "health",
            Endpoint::Metrics => "metrics",
            Endpoint::ModelInfo => "model_info",
            Endpoint::SystemMetrics => "system_metrics",
        }
    }

    /// Position in [`Endpoint::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Endpoint::Predict => 0,
            Endpoint::PredictBatch => 1,
            Endpoint::Health => 2,
            Endpoint::Metrics => 3,
            Endpoint::ModelInfo => 4,
            Endpoint::SystemMetrics => 5,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OperationContext / Operation
// ---------------------------------------------------------------------------

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub request_id: RequestId,
    pub endpoint: Endpoint,
    /// Rate-limit bucket key, already derived by the caller.
    pub client_key: String,
    /// Decision of the external authentication collaborator.
    pub authorized: bool,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    /// Creates an authorized context.
    #[must_use]
    pub fn new(
        call_id: u64,
        request_id: RequestId,
        endpoint: Endpoint,
        client_key: impl Into<String>,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            request_id,
            endpoint,
            client_key: client_key.into(),
            authorized: true,
            call_timeout_ms,
        }
    }
}

/// Typed operation variants dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    Predict { ctx: OperationContext, text: String },
    PredictBatch { ctx: OperationContext, texts: Vec<String> },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Operation::Predict { ctx, .. } | Operation::PredictBatch { ctx, .. } => ctx,
        }
    }

    #[must_use]
    pub fn ctx_mut(&mut self) -> &mut OperationContext {
        match self {
            Operation::Predict { ctx, .. } | Operation::PredictBatch { ctx, .. } => ctx,
        }
    }

    /// Number of texts carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Operation::Predict { .. } => 1,
            Operation::PredictBatch { texts, .. } => texts.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Successful response from the pipeline.
#[derive(Debug)]
pub enum OperationResponse {
    Prediction(PredictionResult),
    Batch(BatchResponse),
}

/// Result of an explicit batch. Partial failure is still a success: every
/// input has exactly one entry, in input order.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub predictions: Vec<ItemOutcome>,
    pub batch_size: usize,
    /// Entries that are [`ItemOutcome::Failed`].
    pub failed: usize,
    #[serde(rename = "total_latency_ms", serialize_with = "durations::as_millis")]
    pub total_latency: Duration,
    pub request_id: RequestId,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ItemOutcome {
    Predicted(PredictionResult),
    Failed(ItemError),
}

impl ItemOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed(_))
    }

    #[must_use]
    pub fn prediction(&self) -> Option<&PredictionResult> {
        match self {
            ItemOutcome::Predicted(result) => Some(result),
            ItemOutcome::Failed(_) => None,
        }
    }
}

/// Error marker for one batch entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub index: usize,
    pub error: String,
    /// Stable machine-readable kind, e.g. `model_error`.
    pub kind: &'static str,
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Errors returned by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        limit: u32,
        retry_after: Option<Duration>,
    },
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("model emitted unknown label {raw_label:?}")]
    UnknownModelLabel { raw_label: String },
    #[error("model emitted invalid output for label {raw_label:?}: score {score}")]
    InvalidModelOutput { raw_label: String, score: f64 },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// HTTP-equivalent status class.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            OperationError::Validation(_) => 400,
            OperationError::Unauthorized => 401,
            OperationError::RateLimitExceeded { .. } => 429,
            OperationError::ModelUnavailable { .. } | OperationError::Overloaded => 503,
            OperationError::Timeout { .. } => 504,
            OperationError::UnknownModelLabel { .. }
            | OperationError::InvalidModelOutput { .. }
            | OperationError::Internal(_) => 500,
        }
    }

    /// Whether the caller caused the failure. Client faults never count
    /// towards the error rate.
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            OperationError::Validation(_)
                | OperationError::Unauthorized
                | OperationError::RateLimitExceeded { .. }
        )
    }

    /// Stable machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::Validation(_) => "validation_error",
            OperationError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            OperationError::Unauthorized => "unauthorized",
            OperationError::ModelUnavailable { .. } => "model_unavailable",
            OperationError::Overloaded => "overloaded",
            OperationError::Timeout { .. } => "timeout",
            OperationError::UnknownModelLabel { .. } => "unknown_model_label",
            OperationError::InvalidModelOutput { .. } => "invalid_model_output",
            OperationError::Internal(_) => "internal_error",
        }
    }
}

impl From<MappingError> for OperationError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::UnknownModelLabel { raw_label } => {
                OperationError::UnknownModelLabel { raw_label }
            }
            MappingError::InvalidModelOutput { raw_label, score } => {
                OperationError::InvalidModelOutput { raw_label, score }
            }
        }
    }
}

impl From<EngineError> for OperationError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ModelUnavailable { reason } => OperationError::ModelUnavailable { reason },
            EngineError::Saturated { .. } => OperationError::Overloaded,
            other @ (EngineError::OutputMismatch { .. } | EngineError::TaskFailed(_)) => {
                OperationError::Internal(anyhow::Error::new(other))
            }
        }
    }
}

impl From<SlotError> for OperationError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::Engine(engine) => engine.into(),
            SlotError::Item(model) => OperationError::Internal(anyhow::Error::new(model)),
            SlotError::QueueFull => OperationError::Overloaded,
            SlotError::Closed => OperationError::ModelUnavailable {
                reason: "prediction service is shutting down".to_string(),
            },
        }
    }
}

impl From<BatchError> for OperationError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Empty => ValidationError::EmptyBatch.into(),
            BatchError::TooLarge { len, max } => ValidationError::BatchTooLarge { len, max }.into(),
            BatchError::Engine(engine) => engine.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
