//! OOM event pipeline
//!
//! Consumes raw OOM records from a channel, corrects their timestamps with
//! the measured clock drift, drops records that happened before this process
//! started, and hands the rest to an [`EventSink`] one at a time.
//!
//! The kernel log survives monitor restarts, so every restart replays old
//! kills; the start-time filter is what keeps them from being re-published.

use crate::clock::ClockDrift;
use crate::health::{components, HealthRegistry};
use crate::models::{CalibratedOomRecord, RawOomRecord};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::publish::{EventSink, SinkError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Default bound on a single publish call
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Idempotency key for a node's OOM event: `<node>.<pid in hex>`
pub fn oom_identity(node_name: &str, pid: u32) -> String {
    format!("{node_name}.{pid:x}")
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Node the events are attached to
    pub node_name: String,
    /// Records calibrated to before this instant are stale
    pub started_at: DateTime<Utc>,
    /// Bound on a single publish call
    pub publish_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(node_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            node_name: node_name.into(),
            started_at,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

/// What happened to a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Published,
    /// Happened before the monitor started
    Stale,
    PublishFailed,
}

/// Totals for one run of the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub observed: u64,
    pub stale: u64,
    pub published: u64,
    pub failed: u64,
}

impl PipelineSummary {
    fn record(&mut self, outcome: ProcessOutcome) {
        self.observed += 1;
        match outcome {
            ProcessOutcome::Published => self.published += 1,
            ProcessOutcome::Stale => self.stale += 1,
            ProcessOutcome::PublishFailed => self.failed += 1,
        }
    }
}

/// Turns raw OOM records into published node events
pub struct OomEventPipeline {
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
    drift: ClockDrift,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl OomEventPipeline {
    pub fn new(
        sink: Arc<dyn EventSink>,
        config: PipelineConfig,
        drift: ClockDrift,
        health: HealthRegistry,
    ) -> Self {
        let logger = StructuredLogger::new(config.node_name.clone());

        Self {
            sink,
            config,
            drift,
            health,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub fn drift(&self) -> ClockDrift {
        self.drift
    }

    /// Consume records until the producer closes the channel
    pub async fn run(self, mut records: mpsc::Receiver<RawOomRecord>) -> PipelineSummary {
        info!(
            node = %self.config.node_name,
            drift = %self.drift,
            started_at = %self.config.started_at,
            "Reading the OOM stream"
        );

        let mut summary = PipelineSummary::default();
        while let Some(record) = records.recv().await {
            let outcome = self.process(record).await;
            summary.record(outcome);
        }

        self.logger
            .log_stream_closed(summary.observed, summary.published);
        self.health
            .set_unhealthy(components::PIPELINE, "OOM stream closed")
            .await;

        summary
    }

    /// Calibrate, filter and publish a single record
    pub async fn process(&self, record: RawOomRecord) -> ProcessOutcome {
        self.metrics.inc_oom_observed();

        let calibrated_time = self.drift.calibrate(record.time_of_death);
        self.logger.log_oom_observed(&record, calibrated_time);

        if calibrated_time < self.config.started_at {
            self.metrics.inc_oom_stale();
            self.logger
                .log_stale_skipped(&record, calibrated_time, self.config.started_at);
            return ProcessOutcome::Stale;
        }

        // The published timestamp is the processing time, not the calibrated
        // time. Consumers order node events by it.
        // TODO: revisit once consumers can order by calibrated event time.
        let calibrated = CalibratedOomRecord {
            identity: oom_identity(&self.config.node_name, record.pid),
            node_name: self.config.node_name.clone(),
            calibrated_time,
            published_at: Utc::now(),
            record,
        };

        self.emit(&calibrated).await
    }

    async fn emit(&self, record: &CalibratedOomRecord) -> ProcessOutcome {
        let start = Instant::now();
        let result =
            match tokio::time::timeout(self.config.publish_timeout, self.sink.publish(record))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.config.publish_timeout)),
            };
        self.metrics
            .observe_publish_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.metrics.inc_oom_published();
                self.logger.log_published(record);
                self.health.set_healthy(components::PUBLISHER).await;
                ProcessOutcome::Published
            }
            Err(e) => {
                self.metrics.inc_publish_errors();
                self.logger.log_publish_failed(record, &e);
                self.health
                    .set_degraded(components::PUBLISHER, e.to_string())
                    .await;
                ProcessOutcome::PublishFailed
            }
        }
    }
}
