//! Monitor configuration
//!
//! Layered, lowest precedence first: defaults, optional config file,
//! `OOM_MONITOR_*` environment variables, command-line flags.

use anyhow::{bail, Context, Result};
use clap::Parser;
use monitor_lib::publish::{EventSinkConfig, DEFAULT_EVENT_REASON};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line flags
#[derive(Debug, Parser)]
#[command(name = "kube-oom-monitor")]
#[command(version, about = "Publishes kernel OOM kills as Kubernetes node events", long_about = None)]
pub struct Args {
    /// Config file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Kubernetes API server URL
    #[arg(long)]
    pub master: Option<String>,

    /// Path to kubeconfig file (in-cluster or default config if not set)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Name of the node to bind events to
    #[arg(long = "node-name", alias = "nodeName", env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Event reason
    #[arg(long = "event-reason", alias = "eventReason")]
    pub event_reason: Option<String>,

    /// Namespace events are written to
    #[arg(long)]
    pub event_namespace: Option<String>,

    /// Kernel message device
    #[arg(long)]
    pub kmsg_path: Option<PathBuf>,

    /// Port for health and metrics endpoints (0 disables them)
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Log events instead of publishing them
    #[arg(long)]
    pub dry_run: bool,
}

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Node name, usually from the downward API
    #[serde(default)]
    pub node_name: String,

    #[serde(default = "default_event_reason")]
    pub event_reason: String,

    #[serde(default = "default_event_namespace")]
    pub event_namespace: String,

    /// API server URL override
    #[serde(default)]
    pub master: Option<String>,

    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_kmsg_path")]
    pub kmsg_path: PathBuf,

    /// How long to wait for the clock sync marker
    #[serde(default = "default_clock_sync_timeout")]
    pub clock_sync_timeout_secs: u64,

    /// Bound on a single event publish
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Capacity of the watcher to pipeline channel
    #[serde(default = "default_record_buffer")]
    pub record_buffer: usize,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub dry_run: bool,
}

fn default_event_reason() -> String {
    DEFAULT_EVENT_REASON.to_string()
}

fn default_event_namespace() -> String {
    "default".to_string()
}

fn default_kmsg_path() -> PathBuf {
    PathBuf::from(monitor_lib::kmsg::DEFAULT_KMSG_PATH)
}

fn default_clock_sync_timeout() -> u64 {
    10
}

fn default_publish_timeout() -> u64 {
    30
}

fn default_record_buffer() -> usize {
    64
}

fn default_api_port() -> u16 {
    8080
}

impl MonitorConfig {
    /// Load configuration from file, environment and flags
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("OOM_MONITOR"))
            .set_override_option("node_name", args.node_name.clone())?
            .set_override_option("event_reason", args.event_reason.clone())?
            .set_override_option("event_namespace", args.event_namespace.clone())?
            .set_override_option("master", args.master.clone())?
            .set_override_option("kubeconfig", path_string(&args.kubeconfig))?
            .set_override_option("kmsg_path", path_string(&args.kmsg_path))?
            .set_override_option("api_port", args.api_port.map(i64::from))?;

        if args.dry_run {
            builder = builder.set_override("dry_run", true)?;
        }

        let config: MonitorConfig = builder
            .build()?
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            bail!("Please specify nodeName (--node-name, NODE_NAME or OOM_MONITOR_NODE_NAME)");
        }
        if self.record_buffer == 0 {
            bail!("record_buffer must be greater than zero");
        }
        Ok(())
    }

    pub fn clock_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.clock_sync_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn sink_config(&self) -> EventSinkConfig {
        EventSinkConfig {
            namespace: self.event_namespace.clone(),
            reason: self.event_reason.clone(),
            ..Default::default()
        }
    }
}

fn path_string(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["kube-oom-monitor"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_with_node_name_flag() {
        let config = MonitorConfig::load(&parse(&["--node-name", "node-1"])).unwrap();

        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.event_reason, "NodeOOM");
        assert_eq!(config.event_namespace, "default");
        assert_eq!(config.kmsg_path, PathBuf::from("/dev/kmsg"));
        assert_eq!(config.clock_sync_timeout(), Duration::from_secs(10));
        assert_eq!(config.publish_timeout(), Duration::from_secs(30));
        assert_eq!(config.record_buffer, 64);
        assert_eq!(config.api_port, 8080);
        assert!(!config.dry_run);
        assert!(config.master.is_none());
    }

    #[test]
    fn test_legacy_flag_aliases() {
        let config = MonitorConfig::load(&parse(&[
            "--nodeName",
            "node-2",
            "--eventReason",
            "ContainerOOM",
            "--master",
            "https://10.0.0.1:6443",
            "--dry-run",
        ]))
        .unwrap();

        assert_eq!(config.node_name, "node-2");
        assert_eq!(config.event_reason, "ContainerOOM");
        assert_eq!(config.master.as_deref(), Some("https://10.0.0.1:6443"));
        assert!(config.dry_run);
        assert_eq!(config.sink_config().reason, "ContainerOOM");
    }

    #[test]
    fn test_config_file_with_flag_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            "node_name = \"from-file\"\nevent_namespace = \"monitoring\"\napi_port = 9100\npublish_timeout_secs = 5\n",
        )
        .unwrap();

        let path_arg = path.display().to_string();
        let config =
            MonitorConfig::load(&parse(&["--config", &path_arg, "--api-port", "9200"])).unwrap();

        assert_eq!(config.event_namespace, "monitoring");
        assert_eq!(config.api_port, 9200);
        assert_eq!(config.publish_timeout(), Duration::from_secs(5));
        assert_eq!(config.sink_config().namespace, "monitoring");
    }

    #[test]
    fn test_validate_rejects_empty_node_name() {
        let config = MonitorConfig::load(&parse(&["--node-name", "node-1"])).unwrap();
        let invalid = MonitorConfig {
            node_name: "  ".to_string(),
            ..config
        };

        let err = invalid.validate().unwrap_err();
        assert!(err.to_string().contains("nodeName"));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = MonitorConfig::load(&parse(&["--node-name", "node-1"])).unwrap();
        let invalid = MonitorConfig {
            record_buffer: 0,
            ..config
        };

        assert!(invalid.validate().is_err());
    }
}
