//! Kubernetes API event sink

use super::{build_event, EventSink, EventSinkConfig, SinkError, FIELD_MANAGER};
use crate::models::CalibratedOomRecord;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

/// Writes node events through the Kubernetes API
///
/// Uses server-side apply keyed on the record identity, so a retried
/// publish overwrites the existing event.
pub struct KubeEventSink {
    api: Api<Event>,
    config: EventSinkConfig,
}

impl KubeEventSink {
    pub fn new(client: Client, config: EventSinkConfig) -> Self {
        Self {
            api: Api::namespaced(client, &config.namespace),
            config,
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, record: &CalibratedOomRecord) -> Result<(), SinkError> {
        let event = build_event(record, &self.config);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        self.api
            .patch(&record.identity, &params, &Patch::Apply(&event))
            .await?;

        debug!(
            identity = %record.identity,
            namespace = %self.config.namespace,
            "Applied node OOM event"
        );
        Ok(())
    }
}
