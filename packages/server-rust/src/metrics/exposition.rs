//! Prometheus text exposition of a [`MetricsSnapshot`].

use std::fmt::Write;

use super::MetricsSnapshot;

/// Content type of [`MetricsSnapshot::render_prometheus`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

impl MetricsSnapshot {
    /// Renders the snapshot in the Prometheus text format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);
        let _ = self.write_prometheus(&mut out);
        out
    }

    fn write_prometheus(&self, out: &mut String) -> std::fmt::Result {
        header(out, "assertion_requests_total", "Requests by endpoint and status class.", "counter")?;
        for r in &self.requests {
            writeln!(
                out,
                "assertion_requests_total{{endpoint=\"{}\",status=\"{}\"}} {}",
                r.endpoint, r.status, r.count
            )?;
        }

        header(out, "assertion_predictions_total", "Predictions by assertion label.", "counter")?;
        for p in &self.predictions {
            writeln!(out, "assertion_predictions_total{{label=\"{}\"}} {}", p.label, p.count)?;
        }

        header(
            out,
            "assertion_request_duration_seconds",
            "Request duration by endpoint.",
            "histogram",
        )?;
        for entry in &self.latency {
            let h = &entry.histogram;
            for (bound, count) in h.bounds.iter().zip(&h.cumulative) {
                writeln!(
                    out,
                    "assertion_request_duration_seconds_bucket{{endpoint=\"{}\",le=\"{bound}\"}} {count}",
                    entry.endpoint
                )?;
            }
            writeln!(
                out,
                "assertion_request_duration_seconds_bucket{{endpoint=\"{}\",le=\"+Inf\"}} {}",
                entry.endpoint, h.count
            )?;
            writeln!(
                out,
                "assertion_request_duration_seconds_sum{{endpoint=\"{}\"}} {}",
                entry.endpoint, h.sum_seconds
            )?;
            writeln!(
                out,
                "assertion_request_duration_seconds_count{{endpoint=\"{}\"}} {}",
                entry.endpoint, h.count
            )?;
        }

        header(
            out,
            "assertion_inference_calls_total",
            "Classify calls that reached the scheduler, by outcome.",
            "counter",
        )?;
        writeln!(out, "assertion_inference_calls_total{{outcome=\"ok\"}} {}", self.inference_ok)?;
        writeln!(
            out,
            "assertion_inference_calls_total{{outcome=\"failed\"}} {}",
            self.inference_failed
        )?;

        header(out, "assertion_uptime_seconds", "Seconds since the process started.", "gauge")?;
        writeln!(out, "assertion_uptime_seconds {}", self.uptime.as_secs_f64())
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) -> std::fmt::Result {
    writeln!(out, "# HELP {name} {help}")?;
    writeln!(out, "# TYPE {name} {kind}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertion_core::AssertionLabel;

    use crate::metrics::MetricsRegistry;
    use crate::service::operation::Endpoint;

    #[test]
    fn renders_every_family_with_help_and_type() {
        let registry = MetricsRegistry::default();
        registry.record_request(Endpoint::Predict, 200, Duration::from_millis(20));
        registry.record_prediction(AssertionLabel::Absent);
        registry.record_inference(1, 0);

        let text = registry.snapshot().render_prometheus();
        for family in [
            "assertion_requests_total",
            "assertion_predictions_total",
            "assertion_request_duration_seconds",
            "assertion_inference_calls_total",
            "assertion_uptime_seconds",
        ] {
            assert!(text.contains(&format!("# HELP {family} ")), "missing HELP for {family}");
            assert!(text.contains(&format!("# TYPE {family} ")), "missing TYPE for {family}");
        }

        assert!(text.contains("assertion_requests_total{endpoint=\"predict\",status=\"2xx\"} 1"));
        assert!(text.contains("assertion_predictions_total{label=\"ABSENT\"} 1"));
        assert!(text.contains(
            "assertion_request_duration_seconds_bucket{endpoint=\"predict\",le=\"0.025\"} 1"
        ));
        assert!(text.contains(
            "assertion_request_duration_seconds_bucket{endpoint=\"predict\",le=\"0.01\"} 0"
        ));
        assert!(text.contains("assertion_request_duration_seconds_count{endpoint=\"predict\"} 1"));
        assert!(text.contains("assertion_inference_calls_total{outcome=\"ok\"} 1"));
    }

    #[test]
    fn every_sample_line_is_name_space_value() {
        let text = MetricsRegistry::default().snapshot().render_prometheus();
        for line in text.lines().filter(|l| !l.starts_with('#')) {
            let (series, value) = line.rsplit_once(' ').unwrap();
            assert!(series.starts_with("assertion_"), "bad series: {line}");
            assert!(value.parse::<f64>().is_ok(), "bad value: {line}");
        }
    }
}
