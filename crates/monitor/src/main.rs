//! kube-oom-monitor
//!
//! This binary runs as a DaemonSet on each Kubernetes node, watching the
//! kernel log for OOM kills and publishing them as events on the Node.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use monitor_lib::{
    api,
    health::components,
    kmsg::{KernelLog, KmsgDevice},
    publish::{EventSink, KubeEventSink, LogEventSink},
    watcher::OomWatcher,
    ClockSynchronizer, HealthRegistry, MonitorMetrics, OomEventPipeline, PipelineConfig,
    StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Events calibrated to before this instant are replays of old kernel log content
    let started_at = Utc::now();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = config::Args::parse();
    let config = config::MonitorConfig::load(&args)?;
    info!(node_name = %config.node_name, dry_run = config.dry_run, "Monitor configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all(components::ALL).await;

    let metrics = MonitorMetrics::new();

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(MONITOR_VERSION, started_at);

    let sink = build_sink(&config).await?;

    if config.api_port != 0 {
        let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
        let port = config.api_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %e, "API server stopped");
            }
        });
    }

    let kernel_log: Arc<dyn KernelLog> = Arc::new(KmsgDevice::new(&config.kmsg_path));

    let drift = match ClockSynchronizer::new(kernel_log.clone())
        .with_timeout(config.clock_sync_timeout())
        .synchronize()
        .await
    {
        Ok(drift) => drift,
        Err(e) => {
            health_registry
                .set_unhealthy(components::CLOCK_SYNC, e.to_string())
                .await;
            return Err(e).context("Clock synchronization failed");
        }
    };
    logger.log_clock_drift(drift);
    metrics.set_clock_drift(drift);

    let (records_tx, records_rx) = mpsc::channel(config.record_buffer);
    let watcher = OomWatcher::new(kernel_log)
        .start(records_tx)
        .await
        .context("Couldn't make a new OOM watcher")?;

    let pipeline = OomEventPipeline::new(
        sink,
        PipelineConfig::new(config.node_name.clone(), started_at)
            .with_publish_timeout(config.publish_timeout()),
        drift,
        health_registry.clone(),
    );
    let pipeline_handle = tokio::spawn(pipeline.run(records_rx));

    health_registry.set_ready(true).await;

    tokio::select! {
        summary = pipeline_handle => {
            let summary = summary.context("OOM pipeline task failed")?;
            info!(
                observed = summary.observed,
                stale = summary.stale,
                published = summary.published,
                failed = summary.failed,
                "OOM stream ended"
            );
            health_registry
                .set_unhealthy(components::OOM_WATCHER, "Kernel log tail ended")
                .await;
            logger.log_shutdown("OOM stream ended");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            watcher.abort();
            logger.log_shutdown("SIGINT received");
        }
    }

    Ok(())
}

/// Kubernetes event sink, or a log-only sink in dry-run mode
async fn build_sink(config: &config::MonitorConfig) -> Result<Arc<dyn EventSink>> {
    let sink_config = config.sink_config();

    if config.dry_run {
        info!("Dry run enabled, events will only be logged");
        return Ok(Arc::new(LogEventSink::new(sink_config)));
    }

    let mut kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .context("Invalid kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("Couldn't infer Kubernetes client configuration")?,
    };

    if let Some(master) = &config.master {
        kube_config.cluster_url = master
            .parse()
            .with_context(|| format!("Invalid master URL {master}"))?;
    }

    let client =
        kube::Client::try_from(kube_config).context("Failed to create Kubernetes client")?;
    info!(namespace = %sink_config.namespace, "Publishing OOM events to Kubernetes");

    Ok(Arc::new(KubeEventSink::new(client, sink_config)))
}
