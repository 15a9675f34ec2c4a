//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for runbridge:
//! - Invocation counts by outcome
//! - Response deliveries by transport (cached, direct, streamed, buffered, empty)
//! - Errors by conventional error name
//! - Dispatch latency
//! - Lazy request builds

use prometheus::{CounterVec, Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for runbridge
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Invocations handled, by outcome (completed, failed)
    pub invocations_total: CounterVec,
    /// Responses written, by delivery kind
    pub deliveries_total: CounterVec,
    /// Errors reported to the invocation error sink
    pub errors_total: CounterVec,
    /// Time from framework dispatch to the sink write
    pub dispatch_duration_seconds: Histogram,
    /// Realized requests actually built
    pub request_builds_total: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let invocations_total = CounterVec::new(
            Opts::new("runbridge_invocations_total", "Total number of invocations"),
            &["outcome"],
        )?;

        let deliveries_total = CounterVec::new(
            Opts::new(
                "runbridge_deliveries_total",
                "Total number of responses written, by delivery kind",
            ),
            &["delivery"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new(
                "runbridge_errors_total",
                "Total number of errors reported to the error sink",
            ),
            &["error_type"],
        )?;

        let dispatch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "runbridge_dispatch_duration_seconds",
                "Framework dispatch and response write duration in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )?;

        let request_builds_total = IntCounter::with_opts(Opts::new(
            "runbridge_request_builds_total",
            "Total number of realized requests built from invocations",
        ))?;

        registry.register(Box::new(invocations_total.clone()))?;
        registry.register(Box::new(deliveries_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(dispatch_duration_seconds.clone()))?;
        registry.register(Box::new(request_builds_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            invocations_total,
            deliveries_total,
            errors_total,
            dispatch_duration_seconds,
            request_builds_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an invocation that ended in a response write
    pub fn record_delivery(&self, delivery: &str, duration_secs: f64) {
        self.invocations_total
            .with_label_values(&["completed"])
            .inc();
        self.deliveries_total.with_label_values(&[delivery]).inc();
        self.dispatch_duration_seconds.observe(duration_secs);
    }

    /// Record an invocation whose error went to the error sink
    pub fn record_failure(&self, error_type: &str, duration_secs: f64) {
        self.invocations_total.with_label_values(&["failed"]).inc();
        self.errors_total.with_label_values(&[error_type]).inc();
        self.dispatch_duration_seconds.observe(duration_secs);
    }

    pub fn record_request_build(&self) {
        self.request_builds_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_delivery() {
        let metrics = Metrics::new().unwrap();
        metrics.record_delivery("cached", 0.002);
        metrics.record_delivery("streamed", 0.5);

        assert_eq!(
            metrics
                .deliveries_total
                .with_label_values(&["cached"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .invocations_total
                .with_label_values(&["completed"])
                .get(),
            2.0
        );
        assert_eq!(metrics.dispatch_duration_seconds.get_sample_count(), 2);
    }

    #[test]
    fn test_record_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure("InvalidHostError", 0.0001);

        assert_eq!(
            metrics
                .errors_total
                .with_label_values(&["InvalidHostError"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics.invocations_total.with_label_values(&["failed"]).get(),
            1.0
        );
    }

    #[test]
    fn test_record_request_build() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request_build();
        metrics.record_request_build();
        assert_eq!(metrics.request_builds_total.get(), 2);
    }

    #[test]
    fn test_metric_names_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_delivery("direct", 0.01);
        metrics.record_failure("TimeoutError", 0.01);
        metrics.record_request_build();

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.name().to_string())
            .collect();

        assert!(names.contains(&"runbridge_invocations_total".to_string()));
        assert!(names.contains(&"runbridge_deliveries_total".to_string()));
        assert!(names.contains(&"runbridge_errors_total".to_string()));
        assert!(names.contains(&"runbridge_dispatch_duration_seconds".to_string()));
        assert!(names.contains(&"runbridge_request_builds_total".to_string()));
    }
}
