use assertion_core::RawPrediction;

use crate::engine::ModelInfo;
use crate::system::SystemUsage;

/// The pretrained classifier behind the inference engine.
///
/// Both methods are blocking and may be slow; the engine always calls them
/// from a blocking-pool thread. The instance is shared read-only across all
/// calls, so implementations must not keep per-request mutable state.
pub trait ModelCapability: Send + Sync + 'static {
    /// Performs the one-time load (weights, tokenizer, device placement).
    ///
    /// # Errors
    ///
    /// Any error leaves the engine permanently unavailable.
    fn load(&self) -> anyhow::Result<ModelInfo>;

    /// Classifies every text, returning exactly one outcome per input in
    /// input order. A failing item must not affect its siblings.
    fn classify_batch(&self, texts: &[String]) -> Vec<Result<RawPrediction, ModelError>>;
}

/// Per-item failure reported by a [`ModelCapability`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ModelError {
    pub message: String,
}

impl ModelError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resource-pressure signal computed by an external system-metrics collaborator.
pub trait SystemPressure: Send + Sync {
    /// Whether a memory or CPU threshold is currently breached.
    fn under_pressure(&self) -> bool;

    /// Host usage figures, when the signal is backed by real measurements.
    fn usage(&self) -> Option<SystemUsage> {
        None
    }
}
