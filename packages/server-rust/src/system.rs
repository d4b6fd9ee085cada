//! Host resource sampling.
//!
//! [`SystemMonitor`] refreshes memory and CPU figures through `sysinfo` each
//! time it is asked, and reports pressure once either crosses its limit.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tracing::debug;

use crate::traits::SystemPressure;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Host memory and CPU usage at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemUsage {
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
}

impl SystemUsage {
    #[must_use]
    pub fn exceeds(&self, limits: &PressureLimits) -> bool {
        self.memory_percent > limits.max_memory_percent || self.cpu_percent > limits.max_cpu_percent
    }
}

/// Usage above which the host counts as under pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureLimits {
    pub max_memory_percent: f64,
    pub max_cpu_percent: f64,
}

impl Default for PressureLimits {
    fn default() -> Self {
        Self {
            max_memory_percent: 90.0,
            max_cpu_percent: 90.0,
        }
    }
}

// ---------------------------------------------------------------------------
// SystemMonitor
// ---------------------------------------------------------------------------

/// [`SystemPressure`] backed by live host statistics.
pub struct SystemMonitor {
    system: Mutex<System>,
    limits: PressureLimits,
}

impl SystemMonitor {
    #[must_use]
    pub fn new(limits: PressureLimits) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        // CPU usage is a delta between refreshes; prime the first reading.
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
            limits,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &PressureLimits {
        &self.limits
    }

    /// Refreshes and returns current usage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&self) -> SystemUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        let total = system.total_memory();
        let used = system.used_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        SystemUsage {
            memory_mb: used as f64 / BYTES_PER_MB,
            memory_percent,
            cpu_percent: f64::from(system.global_cpu_info().cpu_usage()),
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(PressureLimits::default())
    }
}

impl SystemPressure for SystemMonitor {
    fn under_pressure(&self) -> bool {
        let usage = self.sample();
        let breached = usage.exceeds(&self.limits);
        if breached {
            debug!(
                memory_percent = usage.memory_percent,
                cpu_percent = usage.cpu_percent,
                "Resource limit breached"
            );
        }
        breached
    }

    fn usage(&self) -> Option<SystemUsage> {
        Some(self.sample())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(memory_percent: f64, cpu_percent: f64) -> SystemUsage {
        SystemUsage {
            memory_mb: 512.0,
            memory_percent,
            cpu_percent,
        }
    }

    #[test]
    fn either_limit_triggers_pressure() {
        let limits = PressureLimits::default();
        assert!(!usage(50.0, 50.0).exceeds(&limits));
        assert!(!usage(90.0, 90.0).exceeds(&limits));
        assert!(usage(90.5, 10.0).exceeds(&limits));
        assert!(usage(10.0, 97.0).exceeds(&limits));
    }

    #[test]
    fn negative_limits_always_report_pressure() {
        let monitor = SystemMonitor::new(PressureLimits {
            max_memory_percent: -1.0,
            max_cpu_percent: -1.0,
        });
        assert!(monitor.under_pressure());
    }

    #[test]
    fn sample_reports_plausible_host_usage() {
        let monitor = SystemMonitor::default();
        let sample = monitor.sample();
        assert!(sample.memory_mb > 0.0);
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
        assert!(monitor.usage().is_some());
    }
}
