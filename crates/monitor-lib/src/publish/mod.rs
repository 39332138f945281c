//! Publishing calibrated OOM records as Kubernetes events
//!
//! Records are turned into core/v1 `Event` objects bound to the node. The
//! event name is the record identity, so publishing the same record twice
//! updates one object instead of creating two.

mod cluster;
mod dry_run;
mod event;

pub use cluster::KubeEventSink;
pub use dry_run::LogEventSink;
pub use event::{build_event, EventSinkConfig, DEFAULT_EVENT_REASON, FIELD_MANAGER};

use crate::models::CalibratedOomRecord;
use std::time::Duration;
use thiserror::Error;

pub use async_trait::async_trait;

/// Publish failures. Never fatal: the pipeline logs them and moves on.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Destination for calibrated OOM records
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one record. Must be idempotent on `record.identity`.
    async fn publish(&self, record: &CalibratedOomRecord) -> Result<(), SinkError>;
}
