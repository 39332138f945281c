//! Core data models for the OOM monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An OOM kill as extracted from the kernel log
///
/// `time_of_death` is in the kernel log's clock domain: boot-relative time
/// translated to wall time, which drifts from the host clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOomRecord {
    pub pid: u32,
    pub process_name: String,
    /// Cgroup of the killed task
    pub victim_container_scope: String,
    /// Cgroup whose memory limit triggered the kill
    pub killer_container_scope: String,
    pub time_of_death: DateTime<Utc>,
}

/// A raw record that passed the staleness filter and is ready to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibratedOomRecord {
    pub record: RawOomRecord,
    pub node_name: String,
    /// `time_of_death` corrected by the measured clock drift
    pub calibrated_time: DateTime<Utc>,
    /// Wall clock at processing time; this is the timestamp that gets published
    pub published_at: DateTime<Utc>,
    /// Idempotency key derived from node name and pid
    pub identity: String,
}

impl CalibratedOomRecord {
    /// Human-readable event message
    pub fn message(&self) -> String {
        format!(
            "pid:{}\nproc:{}\ntaskcg:{}\noomcg:{}",
            self.record.pid,
            self.record.process_name,
            self.record.victim_container_scope,
            self.record.killer_container_scope
        )
    }
}

/// A single timestamped line read back from the kernel log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl KernelLogEntry {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}
