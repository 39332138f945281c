//! Library for the node OOM monitor
//!
//! This crate provides the core functionality for:
//! - Kernel log clock calibration
//! - OOM kill extraction from the kernel log
//! - Calibrating, filtering and publishing OOM records as node events
//! - Health checks and observability

pub mod api;
pub mod clock;
pub mod health;
pub mod kmsg;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod publish;
pub mod watcher;

pub use clock::{ClockDrift, ClockSyncError, ClockSynchronizer};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use pipeline::{OomEventPipeline, PipelineConfig, PipelineSummary};
