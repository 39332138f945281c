//! Kernel log access
//!
//! The rest of the crate only needs two things from the kernel log: append
//! a line, and read back timestamped lines in arrival order. [`KernelLog`]
//! is that seam; [`KmsgDevice`] implements it over `/dev/kmsg`.

mod device;
mod record;

pub use device::{KmsgDevice, DEFAULT_KMSG_PATH};
pub use record::{parse_chunk, parse_record, KmsgRecord};

use crate::models::KernelLogEntry;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use async_trait::async_trait;

/// Default number of entries buffered between the reader and the consumer
pub const DEFAULT_TAIL_BUFFER: usize = 256;

/// Trait for kernel log implementations
#[async_trait]
pub trait KernelLog: Send + Sync {
    /// Append a single line to the kernel log
    async fn write_line(&self, line: &str) -> io::Result<()>;

    /// Open a live tail starting at the oldest retained entry
    async fn tail(&self) -> io::Result<TailSession>;
}

/// Consumer side of a kernel log tail
///
/// The session is closed when dropped, which tells the producer to stop
/// reading and release the underlying device.
pub struct TailSession {
    entries: mpsc::Receiver<KernelLogEntry>,
    closed: Arc<AtomicBool>,
}

/// Producer side of a kernel log tail
#[derive(Clone)]
pub struct TailFeed {
    entries: mpsc::Sender<KernelLogEntry>,
    closed: Arc<AtomicBool>,
}

impl TailSession {
    /// Create a connected feed/session pair
    pub fn channel(buffer: usize) -> (TailFeed, TailSession) {
        let (tx, rx) = mpsc::channel(buffer);
        let closed = Arc::new(AtomicBool::new(false));

        (
            TailFeed {
                entries: tx,
                closed: closed.clone(),
            },
            TailSession {
                entries: rx,
                closed,
            },
        )
    }

    /// Wait for the next entry; `None` once the stream has ended or the
    /// session was closed
    pub async fn next_entry(&mut self) -> Option<KernelLogEntry> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.entries.recv().await
    }

    /// Close the session explicitly
    pub fn close(mut self) {
        self.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shutdown(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.entries.close();
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TailFeed {
    /// Push an entry from async code. Returns false once the session is gone.
    pub async fn send(&self, entry: KernelLogEntry) -> bool {
        !self.is_closed() && self.entries.send(entry).await.is_ok()
    }

    /// Push an entry from a blocking reader thread
    pub fn blocking_send(&self, entry: KernelLogEntry) -> bool {
        !self.is_closed() && self.entries.blocking_send(entry).is_ok()
    }

    /// True once the consumer closed or dropped the session
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.entries.is_closed()
    }
}
