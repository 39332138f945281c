//! Log-only sink for running without cluster access

use super::{build_event, EventSink, EventSinkConfig, SinkError};
use crate::models::CalibratedOomRecord;
use async_trait::async_trait;
use tracing::info;

/// Logs the event that would have been published
#[derive(Debug, Clone, Default)]
pub struct LogEventSink {
    config: EventSinkConfig,
}

impl LogEventSink {
    pub fn new(config: EventSinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, record: &CalibratedOomRecord) -> Result<(), SinkError> {
        let event = build_event(record, &self.config);
        let body = serde_json::to_string(&event)?;

        info!(
            identity = %record.identity,
            event = %body,
            "Dry run: not publishing OOM event"
        );
        Ok(())
    }
}
