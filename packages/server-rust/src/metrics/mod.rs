//! Process-wide request, prediction, and latency metrics.
//!
//! All counters are pre-allocated atomics indexed by fixed dimensions
//! ([`Endpoint`] x [`StatusClass`], [`AssertionLabel`]), so updates never
//! allocate or take a map lock. Writers share a read guard on `gate`;
//! [`MetricsRegistry::snapshot`] takes the write guard, which makes every
//! snapshot a consistent point-in-time view and blocks writers only for the
//! duration of the copy.

pub mod exposition;
pub mod window;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use assertion_core::{durations, AssertionLabel};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use crate::service::operation::Endpoint;

pub use window::{ErrorRate, ErrorWindow};

/// Upper bounds, in seconds, of the request-duration histogram buckets. An
/// implicit `+Inf` bucket follows.
pub const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const ENDPOINTS: usize = Endpoint::ALL.len();

// ---------------------------------------------------------------------------
// StatusClass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub const ALL: [StatusClass; 3] = [
        StatusClass::Success,
        StatusClass::ClientError,
        StatusClass::ServerError,
    ];

    #[must_use]
    pub fn from_code(status: u16) -> Self {
        match status {
            0..=399 => StatusClass::Success,
            400..=499 => StatusClass::ClientError,
            _ => StatusClass::ServerError,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Success => "2xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }

    fn index(self) -> usize {
        match self {
            StatusClass::Success => 0,
            StatusClass::ClientError => 1,
            StatusClass::ServerError => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// LatencyHistogram
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS.len() + 1],
    sum_micros: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_micros: AtomicU64::new(0),
        }
    }

    fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        let index = LATENCY_BUCKETS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> HistogramSnapshot {
        let mut running = 0;
        let cumulative = self
            .buckets
            .iter()
            .map(|bucket| {
                running += bucket.load(Ordering::Relaxed);
                running
            })
            .collect();
        HistogramSnapshot {
            bounds: LATENCY_BUCKETS.to_vec(),
            cumulative,
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            count: running,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Cumulative bucket counts; `cumulative[i]` counts observations `<= bounds[i]`
/// and the final entry (the `+Inf` bucket) equals `count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub cumulative: Vec<u64>,
    pub sum_seconds: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestCount {
    pub endpoint: Endpoint,
    pub status: &'static str,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: AssertionLabel,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointLatency {
    pub endpoint: Endpoint,
    pub histogram: HistogramSnapshot,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: Vec<RequestCount>,
    pub predictions: Vec<LabelCount>,
    pub latency: Vec<EndpointLatency>,
    pub inference_ok: u64,
    pub inference_failed: u64,
    /// Classify calls inside the sliding error window.
    pub recent: ErrorRate,
    #[serde(rename = "uptime_seconds", serialize_with = "durations::as_secs")]
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Sum of predictions across labels.
    #[must_use]
    pub fn total_predictions(&self) -> u64 {
        self.predictions.iter().map(|p| p.count).sum()
    }

    #[must_use]
    pub fn requests_for(&self, endpoint: Endpoint, status: StatusClass) -> u64 {
        self.requests
            .iter()
            .find(|r| r.endpoint == endpoint && r.status == status.as_str())
            .map_or(0, |r| r.count)
    }

    #[must_use]
    pub fn predictions_for(&self, label: AssertionLabel) -> u64 {
        self.predictions
            .iter()
            .find(|p| p.label == label)
            .map_or(0, |p| p.count)
    }
}

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MetricsRegistry {
    started_at: Instant,
    gate: RwLock<()>,
    requests: [[AtomicU64; 3]; ENDPOINTS],
    predictions: [AtomicU64; 3],
    latency: [LatencyHistogram; ENDPOINTS],
    inference_ok: AtomicU64,
    inference_failed: AtomicU64,
    recent: Mutex<ErrorWindow>,
}

impl MetricsRegistry {
    /// Creates an empty registry whose error window spans `error_window`.
    #[must_use]
    pub fn new(error_window: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            gate: RwLock::new(()),
            requests: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            predictions: std::array::from_fn(|_| AtomicU64::new(0)),
            latency: std::array::from_fn(|_| LatencyHistogram::new()),
            inference_ok: AtomicU64::new(0),
            inference_failed: AtomicU64::new(0),
            recent: Mutex::new(ErrorWindow::new(error_window, started_at)),
        }
    }

    /// Counts one finished request and observes its duration.
    pub fn record_request(&self, endpoint: Endpoint, status: u16, duration: Duration) {
        let _guard = self.gate.read();
        self.requests[endpoint.index()][StatusClass::from_code(status).index()]
            .fetch_add(1, Ordering::Relaxed);
        self.latency[endpoint.index()].observe(duration);
    }

    pub fn record_prediction(&self, label: AssertionLabel) {
        let _guard = self.gate.read();
        self.predictions[label.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Records classify-call outcomes that reached the scheduler.
    pub fn record_inference(&self, ok: u64, failed: u64) {
        if ok == 0 && failed == 0 {
            return;
        }
        let _guard = self.gate.read();
        self.inference_ok.fetch_add(ok, Ordering::Relaxed);
        self.inference_failed.fetch_add(failed, Ordering::Relaxed);
        self.recent.lock().record(Instant::now(), ok, failed);
    }

    /// Classify calls inside the error window, as of now.
    #[must_use]
    pub fn error_rate(&self) -> ErrorRate {
        self.recent.lock().rate(Instant::now())
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let _guard = self.gate.write();

        let requests = Endpoint::ALL
            .into_iter()
            .flat_map(|endpoint| {
                StatusClass::ALL.into_iter().map(move |status| (endpoint, status))
            })
            .map(|(endpoint, status)| RequestCount {
                endpoint,
                status: status.as_str(),
                count: self.requests[endpoint.index()][status.index()].load(Ordering::Relaxed),
            })
            .collect();

        let predictions = AssertionLabel::ALL
            .into_iter()
            .map(|label| LabelCount {
                label,
                count: self.predictions[label.index()].load(Ordering::Relaxed),
            })
            .collect();

        let latency = Endpoint::ALL
            .into_iter()
            .map(|endpoint| EndpointLatency {
                endpoint,
                histogram: self.latency[endpoint.index()].snapshot(),
            })
            .collect();

        MetricsSnapshot {
            requests,
            predictions,
            latency,
            inference_ok: self.inference_ok.load(Ordering::Relaxed),
            inference_failed: self.inference_failed.load(Ordering::Relaxed),
            recent: self.recent.lock().rate(Instant::now()),
            uptime: self.uptime(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
