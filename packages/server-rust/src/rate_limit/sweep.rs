//! Periodic eviction of idle rate-limit buckets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::RateLimiter;
use crate::service::worker::BackgroundRunnable;

/// On-demand work for the sweeper.
#[derive(Debug)]
pub enum SweepTask {
    /// Sweep immediately instead of waiting for the next tick.
    Now,
}

/// Sweeps a shared [`RateLimiter`] on every worker tick.
pub struct BucketSweeper {
    limiter: Arc<RateLimiter>,
}

impl BucketSweeper {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    fn sweep(&self) {
        let removed = self.limiter.sweep(Instant::now());
        if removed > 0 {
            debug!(
                removed,
                remaining = self.limiter.bucket_count(),
                "Evicted idle rate-limit buckets"
            );
        }
    }
}

#[async_trait]
impl BackgroundRunnable for BucketSweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::Now => self.sweep(),
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::config::RateLimitConfig;
    use crate::service::worker::BackgroundWorker;

    fn limiter(idle: Duration) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig {
            idle_timeout: idle,
            ..RateLimitConfig::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn tick_evicts_idle_buckets() {
        let limiter = limiter(Duration::from_secs(10));
        limiter.check("client-a");
        assert_eq!(limiter.bucket_count(), 1);

        let mut worker =
            BackgroundWorker::start(BucketSweeper::new(Arc::clone(&limiter)), Duration::from_secs(5));

        // Still within the idle timeout after the first tick.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(limiter.bucket_count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.bucket_count(), 0);

        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_now_runs_on_demand() {
        let limiter = limiter(Duration::from_secs(1));
        limiter.check("client-a");
        tokio::time::advance(Duration::from_secs(2)).await;

        let mut worker = BackgroundWorker::start(
            BucketSweeper::new(Arc::clone(&limiter)),
            Duration::from_secs(3600),
        );
        worker.submit(SweepTask::Now).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.bucket_count(), 0);

        worker.stop().await;
    }
}
