//! Periodic housekeeping off the request path.
//!
//! A [`BackgroundWorker`] owns one spawned task that calls
//! [`BackgroundRunnable::on_tick`] every `tick` and [`BackgroundRunnable::run`]
//! for each task submitted through its channel. The rate limiter's idle-bucket
//! sweep runs on it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the on-demand task channel.
const TASK_QUEUE: usize = 16;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Housekeeping driven by a [`BackgroundWorker`]. All three hooks run on the
/// worker task, never concurrently with each other.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    async fn on_tick(&mut self) {}

    /// Runs once after the loop exits.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. The first tick fires one `tick` after start; a zero
    /// `tick` is raised to one millisecond.
    pub fn start(mut runnable: R, tick: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_QUEUE);
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let period = tick.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(period);
            tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
            debug!("Background worker stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the worker has not been stopped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Queues `task`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Fails once the worker has stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Ends the loop, runs [`BackgroundRunnable::shutdown`], and waits for the
    /// task to exit. Queued tasks not yet taken are dropped.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
