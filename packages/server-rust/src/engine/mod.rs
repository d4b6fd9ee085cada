//! Inference engine: sole owner of the model capability.
//!
//! The engine performs a one-time, idempotent load (followed by a warm-up
//! classification), publishes readiness lock-free via `ArcSwap`, and runs
//! every model call on the blocking pool behind a semaphore. Calls that
//! cannot get a slot within `acquire_timeout` are rejected instead of queued,
//! which bounds worst-case latency.

pub mod lexicon;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use assertion_core::RawPrediction;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::service::config::EngineConfig;
use crate::traits::{ModelCapability, ModelError};

pub use lexicon::LexiconModel;

/// Sentence classified once after loading to verify the model end to end.
pub const WARMUP_TEXT: &str = "Test sentence for model warmup.";

/// Per-item outcome of a model call.
pub type ItemResult = Result<RawPrediction, ModelError>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Static description of the loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub device: String,
    /// Raw label vocabulary the model emits.
    pub labels: Vec<String>,
}

/// Engine lifecycle: Loading -> Ready, or Loading -> Failed (terminal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Loading,
    Ready(ModelInfo),
    Failed(String),
}

/// Engine-level failures. They apply to a whole model call, never to one item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },
    #[error("inference capacity saturated, no slot within {waited_ms}ms")]
    Saturated { waited_ms: u64 },
    #[error("model returned {got} outputs for {expected} inputs")]
    OutputMismatch { expected: usize, got: usize },
    #[error("inference task failed: {0}")]
    TaskFailed(String),
}

// ---------------------------------------------------------------------------
// InferenceEngine
// ---------------------------------------------------------------------------

pub struct InferenceEngine {
    model: Arc<dyn ModelCapability>,
    config: EngineConfig,
    state: ArcSwap<EngineState>,
    load_started: AtomicBool,
    settled: watch::Sender<bool>,
    permits: Arc<Semaphore>,
}

impl InferenceEngine {
    /// Creates an engine in the `Loading` state. Nothing is loaded until
    /// [`InferenceEngine::load`] or [`InferenceEngine::spawn_load`] runs.
    #[must_use]
    pub fn new(model: Arc<dyn ModelCapability>, config: EngineConfig) -> Self {
        let (settled, _rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            model,
            config,
            state: ArcSwap::from_pointee(EngineState::Loading),
            load_started: AtomicBool::new(false),
            settled,
            permits,
        }
    }

    /// Loads and warms up the model. Returns whether the engine is ready.
    ///
    /// Idempotent: only the first caller performs the load; later and
    /// concurrent callers wait for it to settle and observe its outcome.
    pub async fn load(&self) -> bool {
        if self.load_started.swap(true, Ordering::AcqRel) {
            let mut rx = self.settled.subscribe();
            let _ = rx.wait_for(|settled| *settled).await;
            return self.is_ready();
        }

        info!("Loading model");
        let started = std::time::Instant::now();
        let model = Arc::clone(&self.model);
        let outcome = tokio::task::spawn_blocking(move || load_and_warm_up(model.as_ref())).await;

        let next = match outcome {
            Ok(Ok(info)) => {
                info!(
                    model = %info.model_name,
                    device = %info.device,
                    load_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Model loaded"
                );
                EngineState::Ready(info)
            }
            Ok(Err(err)) => {
                let reason = format!("{err:#}");
                error!(error = %reason, "Model load failed; engine stays unavailable");
                EngineState::Failed(reason)
            }
            Err(join) => {
                error!(error = %join, "Model load task aborted; engine stays unavailable");
                EngineState::Failed(join.to_string())
            }
        };
        self.state.store(Arc::new(next));
        self.settled.send_replace(true);
        self.is_ready()
    }

    /// Starts [`InferenceEngine::load`] on a background task.
    pub fn spawn_load(self: &Arc<Self>) -> tokio::task::JoinHandle<bool> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.load().await })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(**self.state.load(), EngineState::Ready(_))
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        (**self.state.load()).clone()
    }

    #[must_use]
    pub fn model_info(&self) -> Option<ModelInfo> {
        match &**self.state.load() {
            EngineState::Ready(info) => Some(info.clone()),
            _ => None,
        }
    }

    /// Fails fast with the reason the model cannot serve.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ModelUnavailable`] while loading or after a failed load.
    pub fn ensure_ready(&self) -> Result<(), EngineError> {
        match &**self.state.load() {
            EngineState::Ready(_) => Ok(()),
            EngineState::Loading => Err(EngineError::ModelUnavailable {
                reason: "model is still loading".to_string(),
            }),
            EngineState::Failed(reason) => Err(EngineError::ModelUnavailable {
                reason: reason.clone(),
            }),
        }
    }

    /// Classifies one text.
    ///
    /// # Errors
    ///
    /// See [`InferenceEngine::classify_batch`].
    pub async fn classify(&self, text: String) -> Result<ItemResult, EngineError> {
        let mut outcomes = self.classify_batch(vec![text]).await?;
        outcomes.pop().ok_or(EngineError::OutputMismatch {
            expected: 1,
            got: 0,
        })
    }

    /// Classifies a batch, returning one outcome per input in input order.
    ///
    /// The model call runs on the blocking pool. If the caller stops waiting,
    /// the call still completes (and still holds its slot) but its result is
    /// discarded.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ModelUnavailable`] if the model is not ready
    /// - [`EngineError::Saturated`] if no slot frees up within `acquire_timeout`
    /// - [`EngineError::OutputMismatch`] if the model broke the one-output-per-input contract
    /// - [`EngineError::TaskFailed`] if the model panicked
    pub async fn classify_batch(&self, texts: Vec<String>) -> Result<Vec<ItemResult>, EngineError> {
        self.ensure_ready()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(EngineError::ModelUnavailable {
                    reason: "engine is shutting down".to_string(),
                })
            }
            Err(_elapsed) => {
                let waited_ms =
                    u64::try_from(self.config.acquire_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(waited_ms, batch_size = texts.len(), "Inference saturated");
                return Err(EngineError::Saturated { waited_ms });
            }
        };

        let expected = texts.len();
        let chunk_size = self.config.inference_batch_size.max(1);
        let model = Arc::clone(&self.model);
        let outcomes = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut outcomes = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(chunk_size) {
                let mut chunk_out = model.classify_batch(chunk);
                if chunk_out.len() != chunk.len() {
                    return Err(EngineError::OutputMismatch {
                        expected: chunk.len(),
                        got: chunk_out.len(),
                    });
                }
                outcomes.append(&mut chunk_out);
            }
            Ok(outcomes)
        })
        .await
        .map_err(|join| {
            error!(error = %join, "Inference task failed");
            EngineError::TaskFailed(join.to_string())
        })??;

        debug_assert_eq!(outcomes.len(), expected);
        Ok(outcomes)
    }

    /// Number of model calls that could start right now.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state())
            .field("available_slots", &self.available_slots())
            .finish_non_exhaustive()
    }
}

fn load_and_warm_up(model: &dyn ModelCapability) -> anyhow::Result<ModelInfo> {
    let info = model.load()?;
    let warmup = model.classify_batch(&[WARMUP_TEXT.to_string()]);
    match warmup.as_slice() {
        [Ok(_)] => Ok(info),
        [Err(err)] => Err(anyhow::anyhow!("warm-up classification failed: {err}")),
        other => Err(anyhow::anyhow!(
            "warm-up returned {} outputs for 1 input",
            other.len()
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
