use std::time::Duration;

use assertion_core::ValidationConfig;

/// Server-level configuration for the prediction pipeline.
///
/// Controls operation timeouts, concurrency limits, and the settings of every
/// pipeline component.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    pub validation: ValidationConfig,
    pub rate_limit: RateLimitConfig,
    pub engine: EngineConfig,
    pub batch: BatchConfig,
    pub health: HealthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            validation: ValidationConfig::default(),
            rate_limit: RateLimitConfig::default(),
            engine: EngineConfig::default(),
            batch: BatchConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Token-bucket settings shared by every client bucket.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// When false every call is admitted and no buckets are created.
    pub enabled: bool,
    /// Maximum tokens a bucket holds (burst size).
    pub capacity: u32,
    /// Tokens added per `refill_interval`, accrued proportionally.
    pub refill_amount: u32,
    pub refill_interval: Duration,
    /// Buckets untouched for this long are evicted by the sweep.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100,
            refill_amount: 100,
            refill_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// A limit of `requests_per_minute`, refilled continuously.
    #[must_use]
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            capacity: requests_per_minute,
            refill_amount: requests_per_minute,
            refill_interval: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

/// Inference concurrency and backpressure.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model calls allowed to run at the same time.
    pub max_concurrent_batches: usize,
    /// How long a call may wait for a free slot before it is rejected.
    pub acquire_timeout: Duration,
    /// Chunk size used when handing a batch to the model.
    pub inference_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 4,
            acquire_timeout: Duration::from_secs(2),
            inference_batch_size: 8,
        }
    }
}

/// Explicit-batch limits and micro-batch coalescing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Largest explicit batch accepted.
    pub max_batch_size: usize,
    /// Largest coalesced batch of single submissions.
    pub max_micro_batch: usize,
    /// How long the first pending submission waits for company.
    pub coalesce_window: Duration,
    /// Pending single submissions beyond this are rejected.
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_micro_batch: 32,
            coalesce_window: Duration::from_millis(5),
            queue_capacity: 1024,
        }
    }
}

/// Error-rate thresholds for the health state machine.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Failure ratio above which the service is DEGRADED.
    pub degraded_error_rate: f64,
    /// Failure ratio above which the service is UNHEALTHY.
    pub critical_error_rate: f64,
    /// Length of the sliding error-rate window.
    pub window: Duration,
    /// Calls needed in the window before the error rate affects status.
    pub min_samples: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.05,
            critical_error_rate: 0.25,
            window: Duration::from_secs(300),
            min_samples: 20,
        }
    }
}
