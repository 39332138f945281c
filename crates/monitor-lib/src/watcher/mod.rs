//! OOM kill watcher
//!
//! Tails the kernel log and pushes every completed OOM kill into a channel.
//! The channel closes when the tail ends, which is how the pipeline learns
//! the stream is over.

mod parser;

pub use parser::OomParser;

use crate::kmsg::KernelLog;
use crate::models::RawOomRecord;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Produces raw OOM records from the kernel log
pub struct OomWatcher {
    kernel_log: Arc<dyn KernelLog>,
}

impl OomWatcher {
    pub fn new(kernel_log: Arc<dyn KernelLog>) -> Self {
        Self { kernel_log }
    }

    /// Open the kernel log and start streaming records into `records_tx`
    ///
    /// Fails if the kernel log cannot be opened.
    pub async fn start(self, records_tx: mpsc::Sender<RawOomRecord>) -> Result<WatcherHandle> {
        let mut session = self
            .kernel_log
            .tail()
            .await
            .context("Couldn't open the kernel log for OOM watching")?;

        let task = tokio::spawn(async move {
            let mut parser = OomParser::new();
            let mut forwarded = 0u64;

            while let Some(entry) = session.next_entry().await {
                let Some(record) = parser.feed(&entry) else {
                    continue;
                };

                debug!(
                    pid = record.pid,
                    process_name = %record.process_name,
                    time_of_death = %record.time_of_death,
                    "Extracted OOM record from kernel log"
                );

                if records_tx.send(record).await.is_err() {
                    debug!("OOM record receiver dropped");
                    break;
                }
                forwarded += 1;
            }

            info!(forwarded = forwarded, "Kernel log tail ended, closing OOM stream");
        });

        Ok(WatcherHandle { task })
    }
}

/// Handle to a running watcher task
pub struct WatcherHandle {
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop the watcher; dropping its sender closes the OOM stream
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
