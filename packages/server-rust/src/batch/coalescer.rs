//! Micro-batch coalescing loop.
//!
//! The first pending submission opens a window of `coalesce_window`; every
//! submission arriving before it closes (up to `max_micro_batch`) joins the
//! same engine call. Each closed window is dispatched on its own task so the
//! loop keeps collecting while the engine works.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{SlotError, SlotResult};
use crate::engine::InferenceEngine;
use crate::service::config::BatchConfig;

/// A single submission waiting for its micro-batch.
pub struct PendingItem {
    pub text: String,
    pub enqueued_at: Instant,
    pub reply: oneshot::Sender<SlotResult>,
}

pub(crate) struct Coalescer {
    engine: Arc<InferenceEngine>,
    window: Duration,
    max_items: usize,
    rx: mpsc::Receiver<PendingItem>,
    cancel: CancellationToken,
}

impl Coalescer {
    pub(crate) fn new(
        engine: Arc<InferenceEngine>,
        config: &BatchConfig,
        rx: mpsc::Receiver<PendingItem>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            window: config.coalesce_window,
            max_items: config.max_micro_batch.max(1),
            rx,
            cancel,
        }
    }

    /// Runs until cancelled or until every sender is gone. Submissions still
    /// collecting when cancelled are dropped, which resolves them to
    /// [`SlotError::Closed`].
    pub(crate) async fn run(mut self) {
        loop {
            let first = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let deadline = Instant::now() + self.window;
            let mut pending = Vec::with_capacity(self.max_items);
            pending.push(first);

            while pending.len() < self.max_items {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return,
                    next = tokio::time::timeout_at(deadline, self.rx.recv()) => match next {
                        Ok(Some(item)) => pending.push(item),
                        Ok(None) | Err(_) => break,
                    },
                }
            }

            self.dispatch(pending);
        }
        debug!("Micro-batch loop stopped");
    }

    fn dispatch(&self, mut pending: Vec<PendingItem>) {
        // Callers that gave up before dispatch are not sent to the model.
        pending.retain(|item| !item.reply.is_closed());
        if pending.is_empty() {
            return;
        }

        let oldest_wait = pending
            .iter()
            .map(|item| item.enqueued_at.elapsed())
            .max()
            .unwrap_or_default();
        debug!(
            batch_size = pending.len(),
            oldest_wait_ms = oldest_wait.as_secs_f64() * 1000.0,
            "Dispatching micro-batch"
        );

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let (texts, replies): (Vec<String>, Vec<oneshot::Sender<SlotResult>>) = pending
                .into_iter()
                .map(|item| (item.text, item.reply))
                .unzip();

            match engine.classify_batch(texts).await {
                Ok(outcomes) => {
                    for (reply, outcome) in replies.into_iter().zip(outcomes) {
                        let _ = reply.send(outcome.map_err(SlotError::Item));
                    }
                }
                Err(err) => {
                    for reply in replies {
                        let _ = reply.send(Err(SlotError::Engine(err.clone())));
                    }
                }
            }
        });
    }
}
