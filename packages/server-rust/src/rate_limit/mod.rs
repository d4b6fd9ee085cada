//! Per-client token-bucket rate limiting.
//!
//! Each client key owns a bucket of at most `capacity` tokens. Buckets are
//! created full on first use, refill continuously in proportion to elapsed
//! time (`refill_amount` per `refill_interval`), and every admitted call
//! consumes one token. Buckets idle for longer than `idle_timeout` are
//! removed by [`RateLimiter::sweep`], driven by [`sweep::BucketSweeper`].
//!
//! Different keys never contend: the map is sharded and each bucket has its
//! own lock, held only for the refill-and-take step.

pub mod sweep;

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::service::config::RateLimitConfig;

pub use sweep::{BucketSweeper, SweepTask};

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Bucket capacity.
    pub limit: u32,
    /// Whole tokens left after this check.
    pub remaining: u32,
    /// Time until one token is available again, when rejected and refill is on.
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        if config.refill_amount > 0 && !config.refill_interval.is_zero() {
            let elapsed = now.saturating_duration_since(self.last_refill);
            let added = elapsed.as_secs_f64() / config.refill_interval.as_secs_f64()
                * f64::from(config.refill_amount);
            self.tokens = (self.tokens + added).min(f64::from(config.capacity));
        }
        // Never move backwards if callers race with slightly older instants.
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn take(&mut self, config: &RateLimitConfig, now: Instant) -> RateDecision {
        self.refill(config, now);
        if now > self.last_seen {
            self.last_seen = now;
        }

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }

        let retry_after = if allowed || config.refill_amount == 0 || config.refill_interval.is_zero() {
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(
                deficit * config.refill_interval.as_secs_f64() / f64::from(config.refill_amount),
            ))
        };

        RateDecision {
            allowed,
            limit: config.capacity,
            remaining: self.tokens.floor().max(0.0) as u32,
            retry_after,
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Checks and, if admitted, consumes one token for `key`.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// [`RateLimiter::check`] against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        if !self.config.enabled {
            return RateDecision {
                allowed: true,
                limit: self.config.capacity,
                remaining: self.config.capacity,
                retry_after: None,
            };
        }

        if let Some(bucket) = self.buckets.get(key) {
            let decision = bucket.lock().take(&self.config, now);
            return decision;
        }
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::full(&self.config, now)));
        let decision = bucket.lock().take(&self.config, now);
        decision
    }

    /// Boolean form of [`RateLimiter::check`].
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).allowed
    }

    /// Removes buckets not touched within `idle_timeout` of `now`. Returns how
    /// many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.get_mut().last_seen) < idle_timeout
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of live buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn config(capacity: u32, refill_amount: u32, refill_interval: Duration) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            capacity,
            refill_amount,
            refill_interval,
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn new_bucket_starts_full_and_drains() {
        let limiter = RateLimiter::new(config(3, 3, Duration::from_secs(60)));
        let now = Instant::now();

        let first = limiter.check_at("a", now);
        assert!(first.allowed);
        assert_eq!(first.limit, 3);
        assert_eq!(first.remaining, 2);
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("a", now).allowed);

        let rejected = limiter.check_at("a", now);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after, Some(Duration::from_secs(20)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(config(1, 0, Duration::from_secs(60)));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn refill_is_proportional_and_capped() {
        let limiter = RateLimiter::new(config(10, 10, Duration::from_secs(10)));
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(limiter.check_at("a", t0).allowed);
        }
        assert!(!limiter.check_at("a", t0).allowed);

        // Half an interval accrues half the refill amount.
        let t1 = t0 + Duration::from_secs(5);
        for _ in 0..5 {
            assert!(limiter.check_at("a", t1).allowed);
        }
        assert!(!limiter.check_at("a", t1).allowed);

        // A long idle period never overfills the bucket.
        let t2 = t1 + Duration::from_secs(3600);
        let mut admitted = 0;
        while limiter.check_at("a", t2).allowed {
            admitted += 1;
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn zero_refill_never_recovers() {
        let limiter = RateLimiter::new(config(2, 0, Duration::from_secs(1)));
        let t0 = Instant::now();
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));

        let later = limiter.check_at("a", t0 + Duration::from_secs(3600));
        assert!(!later.allowed);
        assert_eq!(later.retry_after, None);
    }

    #[test]
    fn disabled_limiter_admits_everything_without_buckets() {
        let mut cfg = config(1, 0, Duration::from_secs(60));
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg);
        for _ in 0..100 {
            assert!(limiter.allow("a"));
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn sweep_evicts_only_idle_buckets() {
        let mut cfg = config(5, 5, Duration::from_secs(60));
        cfg.idle_timeout = Duration::from_secs(600);
        let limiter = RateLimiter::new(cfg);
        let t0 = Instant::now();

        limiter.check_at("stale", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(500));

        assert_eq!(limiter.sweep(t0 + Duration::from_secs(601)), 1);
        assert_eq!(limiter.bucket_count(), 1);

        // An evicted key comes back with a full bucket.
        let decision = limiter.check_at("stale", t0 + Duration::from_secs(602));
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn concurrent_callers_never_exceed_capacity() {
        let limiter = Arc::new(RateLimiter::new(config(100, 0, Duration::from_secs(60))));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..50).filter(|_| limiter.allow("shared")).count())
            })
            .collect();
        let admitted: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    // -- Property tests --

    proptest! {
        #[test]
        fn exactly_capacity_admitted_at_one_instant(capacity in 1u32..200, extra in 0u32..50) {
            let limiter = RateLimiter::new(config(capacity, capacity, Duration::from_secs(60)));
            let now = Instant::now();
            let admitted = (0..capacity + extra)
                .filter(|_| limiter.check_at("k", now).allowed)
                .count();
            prop_assert_eq!(admitted, capacity as usize);
        }

        #[test]
        fn one_interval_restores_at_least_one_token(capacity in 1u32..100, refill in 1u32..100) {
            let interval = Duration::from_secs(60);
            let limiter = RateLimiter::new(config(capacity, refill, interval));
            let t0 = Instant::now();
            while limiter.check_at("k", t0).allowed {}
            prop_assert!(limiter.check_at("k", t0 + interval).allowed);
        }
    }
}
