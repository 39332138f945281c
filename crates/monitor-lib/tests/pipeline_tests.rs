//! End-to-end: clock sync, OOM extraction from the kernel log, and publishing

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use monitor_lib::{
    clock::SyncMarker,
    health::{components, ComponentStatus},
    kmsg::{async_trait, KernelLog, TailSession},
    publish::{EventSink, SinkError},
    watcher::OomWatcher,
    CalibratedOomRecord, ClockSynchronizer, HealthRegistry, KernelLogEntry, OomEventPipeline,
    PipelineConfig,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Kernel clock running two seconds behind the wall clock
const KERNEL_LAG_SECS: i64 = 2;

/// Kernel log that echoes written lines with a lagging clock, then replays
/// a fixed set of lines and ends the tail
struct ReplayKernelLog {
    written: Mutex<Vec<String>>,
    lines: Vec<KernelLogEntry>,
}

impl ReplayKernelLog {
    fn new(lines: Vec<KernelLogEntry>) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            lines,
        }
    }
}

#[async_trait]
impl KernelLog for ReplayKernelLog {
    async fn write_line(&self, line: &str) -> io::Result<()> {
        self.written.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn tail(&self) -> io::Result<TailSession> {
        let (feed, session) = TailSession::channel(64);

        let mut entries: Vec<KernelLogEntry> = self
            .written
            .lock()
            .unwrap()
            .iter()
            .filter_map(|line| {
                let written_at = SyncMarker::parse(line)?;
                let kernel_time = written_at - ChronoDuration::seconds(KERNEL_LAG_SECS);
                Some(KernelLogEntry::new(kernel_time, line.clone()))
            })
            .collect();
        entries.extend(self.lines.iter().cloned());

        tokio::spawn(async move {
            for entry in entries {
                if !feed.send(entry).await {
                    return;
                }
            }
        });

        Ok(session)
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<CalibratedOomRecord>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, record: &CalibratedOomRecord) -> Result<(), SinkError> {
        self.published.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Kernel log lines for an OOM burst, `wall_offset` relative to `started_at`
fn legacy_burst(started_at: DateTime<Utc>, wall_offset: ChronoDuration) -> Vec<KernelLogEntry> {
    let at = started_at + wall_offset - ChronoDuration::seconds(KERNEL_LAG_SECS);
    vec![
        KernelLogEntry::new(
            at,
            "java invoked oom-killer: gfp_mask=0xd0, order=0, oom_score_adj=999",
        ),
        KernelLogEntry::new(at, "Call Trace:"),
        KernelLogEntry::new(
            at,
            "Task in /kubepods/burstable/pod-a/java killed as a result of limit of /kubepods/burstable/pod-a",
        ),
        KernelLogEntry::new(
            at,
            "Killed process 1234 (java) total-vm:2097152kB, anon-rss:524288kB, file-rss:0kB",
        ),
    ]
}

fn modern_burst(started_at: DateTime<Utc>, wall_offset: ChronoDuration) -> Vec<KernelLogEntry> {
    let at = started_at + wall_offset - ChronoDuration::seconds(KERNEL_LAG_SECS);
    vec![
        KernelLogEntry::new(
            at,
            "python invoked oom-killer: gfp_mask=0xcc0(GFP_KERNEL), order=0, oom_score_adj=985",
        ),
        KernelLogEntry::new(at, "memory: usage 262144kB, limit 262144kB, failcnt 7"),
        KernelLogEntry::new(
            at,
            "oom-kill:constraint=CONSTRAINT_MEMCG,nodemask=(null),cpuset=ctr-b,mems_allowed=0,oom_memcg=/kubepods/pod-b,task_memcg=/kubepods/pod-b/ctr-b,task=python,pid=5678,uid=0",
        ),
        KernelLogEntry::new(
            at,
            "Memory cgroup out of memory: Killed process 5678 (python) total-vm:1048576kB, anon-rss:262144kB, file-rss:0kB",
        ),
    ]
}

#[tokio::test]
async fn test_only_kills_after_start_are_published() {
    let started_at = Utc::now();

    let mut lines = legacy_burst(started_at, ChronoDuration::seconds(-10));
    lines.extend(modern_burst(started_at, ChronoDuration::seconds(1)));
    let kernel_log: Arc<dyn KernelLog> = Arc::new(ReplayKernelLog::new(lines));

    let drift = ClockSynchronizer::new(kernel_log.clone())
        .with_timeout(Duration::from_secs(5))
        .synchronize()
        .await
        .unwrap();
    assert_eq!(drift.as_duration(), ChronoDuration::seconds(KERNEL_LAG_SECS));

    let (records_tx, records_rx) = mpsc::channel(8);
    let _watcher = OomWatcher::new(kernel_log).start(records_tx).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let health = HealthRegistry::new();
    health.register_all(components::ALL).await;

    let pipeline = OomEventPipeline::new(
        sink.clone(),
        PipelineConfig::new("node-1", started_at),
        drift,
        health.clone(),
    );
    let summary = tokio::time::timeout(Duration::from_secs(5), pipeline.run(records_rx))
        .await
        .unwrap();

    assert_eq!(summary.observed, 2);
    assert_eq!(summary.stale, 1);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.failed, 0);

    let published = sink.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);

    let event = &published[0];
    assert_eq!(event.identity, "node-1.162e");
    assert_eq!(event.node_name, "node-1");
    assert_eq!(event.calibrated_time, started_at + ChronoDuration::seconds(1));
    assert!(event.published_at >= started_at);

    let message = event.message();
    assert!(message.contains("5678"));
    assert!(message.contains("python"));
    assert!(message.contains("/kubepods/pod-b/ctr-b"));
    assert!(message.contains("/kubepods/pod-b"));

    assert_eq!(
        health.status_of(components::PIPELINE).await,
        Some(ComponentStatus::Unhealthy)
    );
    assert_eq!(
        health.status_of(components::PUBLISHER).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_watcher_fails_when_kernel_log_unavailable() {
    struct MissingKernelLog;

    #[async_trait]
    impl KernelLog for MissingKernelLog {
        async fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }

        async fn tail(&self) -> io::Result<TailSession> {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    let kernel_log: Arc<dyn KernelLog> = Arc::new(MissingKernelLog);
    let (records_tx, _records_rx) = mpsc::channel(1);

    assert!(ClockSynchronizer::new(kernel_log.clone())
        .synchronize()
        .await
        .is_err());
    assert!(OomWatcher::new(kernel_log).start(records_tx).await.is_err());
}
