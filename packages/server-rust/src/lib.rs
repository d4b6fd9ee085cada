//! Assertion Server: admission control, micro-batched inference, health and
//! metrics for a clinical assertion classifier, served over axum.

pub mod batch;
pub mod engine;
pub mod health;
pub mod metrics;
pub mod network;
pub mod rate_limit;
pub mod service;
pub mod system;
pub mod traits;

pub use engine::{InferenceEngine, LexiconModel, ModelInfo};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus, StaticPressure, SystemMetrics};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use rate_limit::{RateDecision, RateLimiter};
pub use service::{AssertionService, CallerContext, OperationError, ServerConfig};
pub use system::{PressureLimits, SystemMonitor, SystemUsage};
pub use traits::{ModelCapability, ModelError, SystemPressure};
