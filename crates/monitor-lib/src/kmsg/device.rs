//! `/dev/kmsg` backed kernel log

use super::{parse_chunk, KernelLog, TailFeed, TailSession, DEFAULT_TAIL_BUFFER};
use crate::models::KernelLogEntry;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Default kernel message device
pub const DEFAULT_KMSG_PATH: &str = "/dev/kmsg";

const DEFAULT_UPTIME_PATH: &str = "/proc/uptime";

/// Records are at most one page; the kernel rejects shorter read buffers
const READ_BUFFER_SIZE: usize = 8192;

/// Kernel log over the kernel message device
#[derive(Debug, Clone)]
pub struct KmsgDevice {
    path: PathBuf,
    uptime_path: PathBuf,
    poll_interval: Duration,
    buffer_size: usize,
}

impl KmsgDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            uptime_path: PathBuf::from(DEFAULT_UPTIME_PATH),
            poll_interval: Duration::from_millis(100),
            buffer_size: DEFAULT_TAIL_BUFFER,
        }
    }

    /// Override the uptime source (for testing)
    pub fn with_uptime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.uptime_path = path.into();
        self
    }

    /// How long the reader sleeps when no new records are available
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wall time at boot, used to translate record timestamps
    async fn boot_time(&self) -> io::Result<DateTime<Utc>> {
        let content = tokio::fs::read_to_string(&self.uptime_path).await?;
        let uptime = parse_uptime(&content).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected uptime format in {}", self.uptime_path.display()),
            )
        })?;

        Ok(Utc::now() - uptime)
    }
}

impl Default for KmsgDevice {
    fn default() -> Self {
        Self::new(DEFAULT_KMSG_PATH)
    }
}

#[async_trait]
impl KernelLog for KmsgDevice {
    async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await?;

        // One write per record: the kernel treats every write as a message
        let mut payload = line.trim_end_matches('\n').to_string();
        payload.push('\n');
        file.write_all(payload.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), "Wrote line to kernel log");
        Ok(())
    }

    async fn tail(&self) -> io::Result<TailSession> {
        let boot_time = self.boot_time().await?;

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .await?
            .into_std()
            .await;

        info!(path = %self.path.display(), boot_time = %boot_time, "Opened kernel log tail");

        let (feed, session) = TailSession::channel(self.buffer_size);
        let poll_interval = self.poll_interval;
        tokio::task::spawn_blocking(move || read_records(file, boot_time, feed, poll_interval));

        Ok(session)
    }
}

/// Blocking reader loop. Runs until end of file, a read error, or the
/// session is closed.
fn read_records(
    mut file: std::fs::File,
    boot_time: DateTime<Utc>,
    feed: TailFeed,
    poll_interval: Duration,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    while !feed.is_closed() {
        match file.read(&mut buf) {
            Ok(0) => {
                debug!("Kernel log reached end of file");
                break;
            }
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                for record in parse_chunk(&chunk) {
                    let entry = KernelLogEntry::new(record.wall_time(boot_time), record.message);
                    if !feed.blocking_send(entry) {
                        debug!("Kernel log tail closed by consumer");
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(poll_interval);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.raw_os_error() == Some(libc::EPIPE) => {
                // Ring buffer wrapped past our position; the next read resumes
                // at the oldest retained record
                debug!("Kernel log records overwritten while reading, skipping");
            }
            Err(e) => {
                warn!(error = %e, "Failed to read kernel log");
                break;
            }
        }
    }
}

/// Parse the first field of `/proc/uptime` (seconds since boot)
fn parse_uptime(content: &str) -> Option<ChronoDuration> {
    let secs: f64 = content.split_whitespace().next()?.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(ChronoDuration::microseconds((secs * 1_000_000.0).round() as i64))
}
