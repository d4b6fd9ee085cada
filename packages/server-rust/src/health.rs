//! Composite service health.
//!
//! Health is recomputed on every query from the engine state, the metrics
//! error window, and the resource-pressure signal. Nothing is cached and
//! nothing is mutated.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assertion_core::durations;
use serde::Serialize;
use tracing::warn;

use crate::engine::{InferenceEngine, ModelInfo};
use crate::metrics::{ErrorRate, MetricsRegistry};
use crate::service::config::HealthConfig;
use crate::traits::SystemPressure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }

    /// Whether the service should keep receiving traffic.
    #[must_use]
    pub fn is_serving(self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    fn to_u8(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies health from its three signals.
///
/// The error rate only counts once the window holds at least
/// `config.min_samples` calls.
#[must_use]
pub fn classify_health(
    model_ready: bool,
    recent: ErrorRate,
    resource_pressure: bool,
    config: &HealthConfig,
) -> HealthStatus {
    if !model_ready {
        return HealthStatus::Unhealthy;
    }
    let rate = if recent.total >= config.min_samples {
        recent.ratio()
    } else {
        0.0
    };
    if rate > config.critical_error_rate {
        HealthStatus::Unhealthy
    } else if rate > config.degraded_error_rate || resource_pressure {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Point-in-time health view.
///
/// Two snapshots taken with no traffic in between are equal in every field
/// except `uptime`, which always advances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub model_ready: bool,
    pub error_rate_5m: f64,
    pub resource_pressure: bool,
    #[serde(rename = "uptime_seconds", serialize_with = "durations::as_secs")]
    pub uptime: Duration,
    pub total_predictions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
}

/// `GET /system/metrics` body: process counters plus host usage. Usage fields
/// are null when the pressure signal has no real measurements behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub total_predictions: u64,
    #[serde(rename = "uptime_seconds", serialize_with = "durations::as_secs")]
    pub uptime: Duration,
    pub memory_usage_mb: Option<f64>,
    pub memory_percent: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub model_loaded: bool,
}

// ---------------------------------------------------------------------------
// HealthMonitor
// ---------------------------------------------------------------------------

pub struct HealthMonitor {
    engine: Arc<InferenceEngine>,
    metrics: Arc<MetricsRegistry>,
    pressure: Arc<dyn SystemPressure>,
    config: HealthConfig,
    /// Last reported status, only used to log transitions.
    last: AtomicU8,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        engine: Arc<InferenceEngine>,
        metrics: Arc<MetricsRegistry>,
        pressure: Arc<dyn SystemPressure>,
        config: HealthConfig,
    ) -> Self {
        Self {
            engine,
            metrics,
            pressure,
            config,
            last: AtomicU8::new(HealthStatus::Healthy.to_u8()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let model = self.engine.model_info();
        let model_ready = model.is_some();
        let metrics = self.metrics.snapshot();
        let resource_pressure = self.pressure.under_pressure();
        let status = classify_health(model_ready, metrics.recent, resource_pressure, &self.config);

        let previous = self.last.swap(status.to_u8(), Ordering::Relaxed);
        if previous != status.to_u8() {
            warn!(
                status = %status,
                model_ready,
                error_rate = metrics.recent.ratio(),
                samples = metrics.recent.total,
                resource_pressure,
                "Health status changed"
            );
        }

        HealthSnapshot {
            status,
            model_ready,
            error_rate_5m: metrics.recent.ratio(),
            resource_pressure,
            uptime: metrics.uptime,
            total_predictions: metrics.total_predictions(),
            model,
        }
    }

    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        let usage = self.pressure.usage();
        let metrics = self.metrics.snapshot();
        SystemMetrics {
            total_predictions: metrics.total_predictions(),
            uptime: metrics.uptime,
            memory_usage_mb: usage.map(|u| u.memory_mb),
            memory_percent: usage.map(|u| u.memory_percent),
            cpu_usage_percent: usage.map(|u| u.cpu_percent),
            model_loaded: self.engine.is_ready(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// StaticPressure
// ---------------------------------------------------------------------------

/// Pressure signal held in a flag; set by whatever samples system resources.
#[derive(Debug, Default)]
pub struct StaticPressure(AtomicBool);

impl StaticPressure {
    #[must_use]
    pub fn new(under_pressure: bool) -> Self {
        Self(AtomicBool::new(under_pressure))
    }

    pub fn set(&self, under_pressure: bool) {
        self.0.store(under_pressure, Ordering::Relaxed);
    }
}

impl SystemPressure for StaticPressure {
    fn under_pressure(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
