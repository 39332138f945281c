//! Kernel log clock calibration
//!
//! Kernel log timestamps are relative to boot and drift from wall time
//! (VM pause/resume, clock slews). The synchronizer writes a marker carrying
//! the current wall time into the kernel log, reads back the timestamp the
//! kernel assigned to it, and reports the difference as a [`ClockDrift`].

use crate::kmsg::{KernelLog, TailSession};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Prefix of the marker line written into the kernel log
pub const MARKER_PREFIX: &str = "current_time_unix_nano:";

/// Default time to wait for the marker to show up in the tail
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Offset to add to kernel log timestamps to get wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDrift(ChronoDuration);

impl ClockDrift {
    pub fn new(drift: ChronoDuration) -> Self {
        Self(drift)
    }

    pub fn zero() -> Self {
        Self(ChronoDuration::zero())
    }

    /// Drift between a wall-clock reading and the kernel timestamp of the
    /// same event
    pub fn between(wall_time: DateTime<Utc>, kernel_time: DateTime<Utc>) -> Self {
        Self(wall_time - kernel_time)
    }

    /// Translate a kernel log timestamp to wall time
    pub fn calibrate(&self, kernel_time: DateTime<Utc>) -> DateTime<Utc> {
        kernel_time + self.0
    }

    pub fn as_duration(&self) -> ChronoDuration {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        match self.0.num_nanoseconds() {
            Some(nanos) => nanos as f64 / 1e9,
            None => self.0.num_milliseconds() as f64 / 1e3,
        }
    }
}

impl fmt::Display for ClockDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.6}s", self.as_secs_f64())
    }
}

/// Self-identifying marker line stamped with the time it was created
#[derive(Debug, Clone)]
pub struct SyncMarker {
    written_at: DateTime<Utc>,
    text: String,
}

impl SyncMarker {
    pub fn new(written_at: DateTime<Utc>) -> Self {
        let nanos = i128::from(written_at.timestamp()) * 1_000_000_000
            + i128::from(written_at.timestamp_subsec_nanos());

        Self {
            written_at,
            text: format!("{MARKER_PREFIX}{nanos}"),
        }
    }

    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// True if a kernel log line is this marker echoed back
    pub fn matches(&self, line: &str) -> bool {
        line.starts_with(&self.text)
    }

    /// Recover the wall time embedded in a marker line
    pub fn parse(line: &str) -> Option<DateTime<Utc>> {
        let digits: String = line
            .strip_prefix(MARKER_PREFIX)?
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        let nanos: i128 = digits.parse().ok()?;

        let secs = i64::try_from(nanos.div_euclid(1_000_000_000)).ok()?;
        let subsec = nanos.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, subsec)
    }
}

/// Clock synchronization failures. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ClockSyncError {
    #[error("can't sync clocks: failed to write marker to kernel log")]
    Write(#[source] io::Error),

    #[error("can't sync clocks: failed to open kernel log tail")]
    Tail(#[source] io::Error),

    #[error("can't sync clocks: message not found in kernel log buffer")]
    NotFound,

    #[error("can't sync clocks: message not seen in kernel log within {0:?}")]
    Timeout(Duration),
}

/// Measures kernel log clock drift by round-tripping a marker
pub struct ClockSynchronizer {
    kernel_log: Arc<dyn KernelLog>,
    timeout: Duration,
}

impl ClockSynchronizer {
    pub fn new(kernel_log: Arc<dyn KernelLog>) -> Self {
        Self {
            kernel_log,
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    /// Bound the time spent waiting for the marker
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write a marker, find it in the kernel log, and return the drift
    pub async fn synchronize(&self) -> Result<ClockDrift, ClockSyncError> {
        let marker = SyncMarker::new(Utc::now());

        self.kernel_log
            .write_line(marker.text())
            .await
            .map_err(ClockSyncError::Write)?;
        debug!(marker = %marker.text(), "Wrote clock sync marker");

        let mut session = self
            .kernel_log
            .tail()
            .await
            .map_err(ClockSyncError::Tail)?;

        let found = tokio::time::timeout(self.timeout, find_marker(&mut session, &marker)).await;
        session.close();

        let kernel_time = match found {
            Ok(Some(kernel_time)) => kernel_time,
            Ok(None) => return Err(ClockSyncError::NotFound),
            Err(_) => return Err(ClockSyncError::Timeout(self.timeout)),
        };

        let drift = ClockDrift::between(marker.written_at(), kernel_time);
        info!(
            drift = %drift,
            wall_time = %marker.written_at(),
            kernel_time = %kernel_time,
            "Measured kernel log clock drift"
        );

        Ok(drift)
    }
}

async fn find_marker(session: &mut TailSession, marker: &SyncMarker) -> Option<DateTime<Utc>> {
    while let Some(entry) = session.next_entry().await {
        if marker.matches(&entry.text) {
            return Some(entry.timestamp);
        }
    }
    None
}
