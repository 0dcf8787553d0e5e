//! Prometheus metrics for router operations.

use once_cell::sync::OnceCell;
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

const OUTCOME_LABEL: &str = "outcome";
const STATUS_LABEL: &str = "status";

/// Metrics collector for resolution and dispatch
pub struct MetricsCollector {
    registry: Registry,

    /// Resolutions by outcome (resolved, no_match, max_depth_exceeded)
    resolutions_total: CounterVec,

    /// Resolution latency in milliseconds
    resolve_duration_ms: Histogram,

    /// Dispatches by status (completed, handler_failed, timeout, cancelled,
    /// unresolved, unknown_handler)
    dispatches_total: CounterVec,

    /// Audit entries by disposition (written, diverted, write_failed)
    audit_entries_total: CounterVec,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let resolutions_opts = Opts::new("caproute_resolutions_total", "Total resolutions");
        let resolutions_total = CounterVec::new(resolutions_opts, &[OUTCOME_LABEL])
            .expect("Failed to create resolutions counter");
        registry
            .register(Box::new(resolutions_total.clone()))
            .expect("Failed to register resolutions counter");

        let duration_opts = HistogramOpts::new(
            "caproute_resolve_duration_ms",
            "Resolution duration in milliseconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0]);
        let resolve_duration_ms =
            Histogram::with_opts(duration_opts).expect("Failed to create duration histogram");
        registry
            .register(Box::new(resolve_duration_ms.clone()))
            .expect("Failed to register duration histogram");

        let dispatches_opts = Opts::new("caproute_dispatches_total", "Total dispatches");
        let dispatches_total = CounterVec::new(dispatches_opts, &[STATUS_LABEL])
            .expect("Failed to create dispatches counter");
        registry
            .register(Box::new(dispatches_total.clone()))
            .expect("Failed to register dispatches counter");

        let audit_opts = Opts::new(
            "caproute_audit_entries_total",
            "Audit entries by disposition",
        );
        let audit_entries_total =
            CounterVec::new(audit_opts, &[STATUS_LABEL]).expect("Failed to create audit counter");
        registry
            .register(Box::new(audit_entries_total.clone()))
            .expect("Failed to register audit counter");

        Self {
            registry,
            resolutions_total,
            resolve_duration_ms,
            dispatches_total,
            audit_entries_total,
        }
    }

    pub fn record_resolution(&self, outcome: &str, duration_ms: f64) {
        self.resolutions_total.with_label_values(&[outcome]).inc();
        self.resolve_duration_ms.observe(duration_ms);
    }

    pub fn record_dispatch(&self, status: &str) {
        self.dispatches_total.with_label_values(&[status]).inc();
    }

    pub fn record_audit(&self, disposition: &str) {
        self.audit_entries_total
            .with_label_values(&[disposition])
            .inc();
    }

    /// Get Prometheus-formatted metrics
    pub fn prometheus_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("Failed to encode metrics");
        String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: OnceCell<MetricsCollector> = OnceCell::new();

/// Get the global metrics collector
pub fn global() -> &'static MetricsCollector {
    METRICS.get_or_init(MetricsCollector::new)
}

pub fn record_resolution(outcome: &str, duration_ms: f64) {
    global().record_resolution(outcome, duration_ms);
}

pub fn record_dispatch(status: &str) {
    global().record_dispatch(status);
}

pub fn record_audit(disposition: &str) {
    global().record_audit(disposition);
}

/// Get Prometheus metrics from the global collector
pub fn prometheus() -> String {
    global().prometheus_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();
        collector.record_resolution("resolved", 0.4);
        collector.record_resolution("no_match", 0.2);
        collector.record_dispatch("completed");
        collector.record_audit("written");

        let prom = collector.prometheus_metrics();
        assert!(prom.contains("caproute_resolutions_total"));
        assert!(prom.contains("caproute_dispatches_total"));
        assert!(prom.contains("caproute_audit_entries_total"));
    }
}
