//! Batch scheduling in front of the inference engine.
//!
//! Two entry points:
//! - [`BatchScheduler::submit_batch`]: an explicit client batch, sent to the
//!   engine as one call.
//! - [`BatchScheduler::submit_single`]: one text, coalesced with other
//!   single submissions arriving within `coalesce_window` (or until
//!   `max_micro_batch` is reached) into one engine call. See [`coalescer`].
//!
//! Both preserve input order, and a failing item never affects its siblings.

pub mod coalescer;

use std::sync::Arc;
use std::time::Duration;

use assertion_core::RawPrediction;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{EngineError, InferenceEngine};
use crate::service::config::BatchConfig;
use crate::traits::ModelError;

use coalescer::{Coalescer, PendingItem};

/// Outcome for one slot of a batch.
pub type SlotResult = Result<RawPrediction, SlotError>;

/// Why one slot produced no prediction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// The whole underlying engine call failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The model failed on this item only.
    #[error("model failed on this item: {0}")]
    Item(#[from] ModelError),
    /// Too many single submissions are already waiting.
    #[error("micro-batch queue is full")]
    QueueFull,
    /// The scheduler stopped before the slot was serviced.
    #[error("batch scheduler is shut down")]
    Closed,
}

/// Rejections of an explicit batch before or during its engine call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch must contain at least one text")]
    Empty,
    #[error("batch has {len} texts, limit is {max}")]
    TooLarge { len: usize, max: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Ordered outcomes of an explicit batch.
#[derive(Debug)]
pub struct ScheduledBatch {
    /// One entry per input, in input order.
    pub outcomes: Vec<SlotResult>,
    /// Wall time of the engine call.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// BatchScheduler
// ---------------------------------------------------------------------------

pub struct BatchScheduler {
    engine: Arc<InferenceEngine>,
    config: BatchConfig,
    queue: mpsc::Sender<PendingItem>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Creates the scheduler and spawns its coalescing loop.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(engine: Arc<InferenceEngine>, config: BatchConfig) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let coalescer = Coalescer::new(Arc::clone(&engine), &config, rx, cancel.clone());
        let handle = tokio::spawn(coalescer.run());
        Self {
            engine,
            config,
            queue,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Classifies an explicit batch as one engine call.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Empty`] or [`BatchError::TooLarge`] without
    /// touching the engine, and [`BatchError::Engine`] if the engine call as a
    /// whole failed. Per-item model failures are reported inside
    /// [`ScheduledBatch::outcomes`].
    pub async fn submit_batch(&self, texts: Vec<String>) -> Result<ScheduledBatch, BatchError> {
        if texts.is_empty() {
            return Err(BatchError::Empty);
        }
        if texts.len() > self.config.max_batch_size {
            return Err(BatchError::TooLarge {
                len: texts.len(),
                max: self.config.max_batch_size,
            });
        }

        let batch_size = texts.len();
        let started = Instant::now();
        let outcomes = self.engine.classify_batch(texts).await?;
        let elapsed = started.elapsed();
        debug!(batch_size, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "Explicit batch classified");

        Ok(ScheduledBatch {
            outcomes: outcomes
                .into_iter()
                .map(|outcome| outcome.map_err(SlotError::Item))
                .collect(),
            elapsed,
        })
    }

    /// Classifies one text as part of a coalesced micro-batch.
    ///
    /// Dropping the returned future before the micro-batch is dispatched
    /// removes the submission from the pending set; dropping it afterwards
    /// discards the result.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::Engine`] when the model is unavailable (checked
    /// before enqueuing) or the engine call failed, [`SlotError::Item`] when
    /// the model failed on this text, [`SlotError::QueueFull`] under
    /// backpressure, and [`SlotError::Closed`] after shutdown.
    pub async fn submit_single(&self, text: String) -> SlotResult {
        self.engine.ensure_ready()?;

        let (reply, rx) = oneshot::channel();
        let item = PendingItem {
            text,
            enqueued_at: Instant::now(),
            reply,
        };
        self.queue.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SlotError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SlotError::Closed,
        })?;

        rx.await.unwrap_or(Err(SlotError::Closed))
    }

    /// Stops the coalescing loop. Pending single submissions resolve to
    /// [`SlotError::Closed`]; micro-batches already dispatched still complete.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
