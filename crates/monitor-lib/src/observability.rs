//! Observability infrastructure for the OOM monitor
//!
//! Provides:
//! - Prometheus metrics (clock drift, OOM event counters, publish latency)
//! - Structured JSON logging with tracing

use crate::clock::ClockDrift;
use crate::models::{CalibratedOomRecord, RawOomRecord};
use chrono::{DateTime, Utc};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, Gauge, Histogram, IntCounter,
};
use std::sync::OnceLock;
use tracing::{error, info};

/// Histogram buckets for publish latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MonitorMetricsInner {
    clock_drift_seconds: Gauge,
    oom_events_observed: IntCounter,
    oom_events_stale: IntCounter,
    oom_events_published: IntCounter,
    publish_errors: IntCounter,
    publish_latency_seconds: Histogram,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            clock_drift_seconds: register_gauge!(
                "kube_oom_monitor_clock_drift_seconds",
                "Measured offset between wall clock and kernel log clock"
            )
            .expect("Failed to register clock_drift_seconds"),

            oom_events_observed: register_int_counter!(
                "kube_oom_monitor_oom_events_observed_total",
                "OOM kills read from the kernel log"
            )
            .expect("Failed to register oom_events_observed"),

            oom_events_stale: register_int_counter!(
                "kube_oom_monitor_oom_events_stale_total",
                "OOM kills skipped because they predate the monitor start"
            )
            .expect("Failed to register oom_events_stale"),

            oom_events_published: register_int_counter!(
                "kube_oom_monitor_oom_events_published_total",
                "OOM events successfully published"
            )
            .expect("Failed to register oom_events_published"),

            publish_errors: register_int_counter!(
                "kube_oom_monitor_publish_errors_total",
                "OOM events that failed to publish"
            )
            .expect("Failed to register publish_errors"),

            publish_latency_seconds: register_histogram!(
                "kube_oom_monitor_publish_latency_seconds",
                "Time spent publishing a single OOM event",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register publish_latency_seconds"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn set_clock_drift(&self, drift: ClockDrift) {
        self.inner().clock_drift_seconds.set(drift.as_secs_f64());
    }

    pub fn inc_oom_observed(&self) {
        self.inner().oom_events_observed.inc();
    }

    pub fn inc_oom_stale(&self) {
        self.inner().oom_events_stale.inc();
    }

    pub fn inc_oom_published(&self) {
        self.inner().oom_events_published.inc();
    }

    pub fn inc_publish_errors(&self) {
        self.inner().publish_errors.inc();
    }

    pub fn observe_publish_latency(&self, duration_secs: f64) {
        self.inner().publish_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for OOM records
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, started_at: DateTime<Utc>) {
        info!(
            event = "monitor_started",
            node = %self.node_name,
            version = %version,
            started_at = %started_at,
            "OOM monitor started"
        );
    }

    /// Log the measured clock drift
    pub fn log_clock_drift(&self, drift: ClockDrift) {
        info!(
            event = "clock_synchronized",
            node = %self.node_name,
            drift_seconds = drift.as_secs_f64(),
            "Clock drift: {}",
            drift
        );
    }

    /// Log a raw OOM record as it arrives
    pub fn log_oom_observed(&self, record: &RawOomRecord, calibrated_time: DateTime<Utc>) {
        info!(
            event = "oom_observed",
            node = %self.node_name,
            pid = record.pid,
            process_name = %record.process_name,
            victim_scope = %record.victim_container_scope,
            killer_scope = %record.killer_container_scope,
            time_of_death = %record.time_of_death,
            calibrated_time = %calibrated_time,
            "OOM kill observed"
        );
    }

    /// Log a record dropped because it predates the monitor start
    pub fn log_stale_skipped(
        &self,
        record: &RawOomRecord,
        calibrated_time: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) {
        info!(
            event = "oom_stale_skipped",
            node = %self.node_name,
            pid = record.pid,
            process_name = %record.process_name,
            calibrated_time = %calibrated_time,
            started_at = %started_at,
            "Skipping this old event"
        );
    }

    /// Log a successful publish
    pub fn log_published(&self, record: &CalibratedOomRecord) {
        info!(
            event = "oom_published",
            node = %self.node_name,
            identity = %record.identity,
            pid = record.record.pid,
            process_name = %record.record.process_name,
            published_at = %record.published_at,
            "Published OOM event"
        );
    }

    /// Log a failed publish
    pub fn log_publish_failed(&self, record: &CalibratedOomRecord, error: &dyn std::error::Error) {
        error!(
            event = "oom_publish_failed",
            node = %self.node_name,
            identity = %record.identity,
            pid = record.record.pid,
            error = %error,
            "Unable to write event"
        );
    }

    /// Log the end of the OOM stream
    pub fn log_stream_closed(&self, observed: u64, published: u64) {
        info!(
            event = "oom_stream_closed",
            node = %self.node_name,
            observed = observed,
            published = published,
            "OOM stream closed"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "OOM monitor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        let metrics = MonitorMetrics::new();

        metrics.set_clock_drift(ClockDrift::zero());
        metrics.inc_oom_observed();
        metrics.inc_oom_stale();
        metrics.inc_oom_published();
        metrics.inc_publish_errors();
        metrics.observe_publish_latency(0.01);

        // Clones share the global registry entries
        let clone = metrics.clone();
        clone.inc_oom_observed();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
