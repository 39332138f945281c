//! Kubernetes `Event` construction

use crate::models::CalibratedOomRecord;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

/// Reason used when none is configured
pub const DEFAULT_EVENT_REASON: &str = "NodeOOM";

/// Field manager and source component for published events
pub const FIELD_MANAGER: &str = "kube-oom-monitor";

/// How published events are labelled
#[derive(Debug, Clone)]
pub struct EventSinkConfig {
    /// Namespace the events are written to
    pub namespace: String,
    /// Event reason (category)
    pub reason: String,
    /// Source component label
    pub component: String,
    /// Event type (severity)
    pub event_type: String,
}

impl Default for EventSinkConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            reason: DEFAULT_EVENT_REASON.to_string(),
            component: FIELD_MANAGER.to_string(),
            event_type: "Warning".to_string(),
        }
    }
}

/// Build the node event for a calibrated record
pub fn build_event(record: &CalibratedOomRecord, config: &EventSinkConfig) -> Event {
    let timestamp = Time(record.published_at);

    Event {
        metadata: ObjectMeta {
            name: Some(record.identity.clone()),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some("Node".to_string()),
            name: Some(record.node_name.clone()),
            ..Default::default()
        },
        reason: Some(config.reason.clone()),
        message: Some(record.message()),
        first_timestamp: Some(timestamp.clone()),
        last_timestamp: Some(timestamp),
        count: Some(1),
        type_: Some(config.event_type.clone()),
        source: Some(EventSource {
            component: Some(config.component.clone()),
            host: Some(record.node_name.clone()),
        }),
        reporting_component: Some(config.component.clone()),
        reporting_instance: Some(record.node_name.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawOomRecord;
    use chrono::{DateTime, Utc};

    fn test_record() -> CalibratedOomRecord {
        let published_at = DateTime::<Utc>::from_timestamp(1_700_000_100, 0).unwrap();
        CalibratedOomRecord {
            record: RawOomRecord {
                pid: 5678,
                process_name: "python".to_string(),
                victim_container_scope: "/kubepods/pod1/abc".to_string(),
                killer_container_scope: "/kubepods/pod1".to_string(),
                time_of_death: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            },
            node_name: "node-1".to_string(),
            calibrated_time: DateTime::<Utc>::from_timestamp(1_700_000_002, 0).unwrap(),
            published_at,
            identity: "node-1.162e".to_string(),
        }
    }

    #[test]
    fn test_build_event() {
        let record = test_record();
        let event = build_event(&record, &EventSinkConfig::default());

        assert_eq!(event.metadata.name.as_deref(), Some("node-1.162e"));
        assert_eq!(event.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(event.involved_object.kind.as_deref(), Some("Node"));
        assert_eq!(event.involved_object.name.as_deref(), Some("node-1"));
        assert_eq!(event.reason.as_deref(), Some("NodeOOM"));
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.count, Some(1));
        assert_eq!(event.message, Some(record.message()));

        let source = event.source.unwrap();
        assert_eq!(source.component.as_deref(), Some("kube-oom-monitor"));
        assert_eq!(source.host.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_build_event_uses_publish_time() {
        let record = test_record();
        let event = build_event(&record, &EventSinkConfig::default());

        assert_eq!(event.first_timestamp.unwrap().0, record.published_at);
        assert_eq!(event.last_timestamp.unwrap().0, record.published_at);
    }

    #[test]
    fn test_build_event_custom_reason_and_namespace() {
        let config = EventSinkConfig {
            namespace: "monitoring".to_string(),
            reason: "ContainerOOM".to_string(),
            ..Default::default()
        };
        let event = build_event(&test_record(), &config);

        assert_eq!(event.metadata.namespace.as_deref(), Some("monitoring"));
        assert_eq!(event.reason.as_deref(), Some("ContainerOOM"));
    }

    #[test]
    fn test_event_serializes_with_type_meta() {
        let event = build_event(&test_record(), &EventSinkConfig::default());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Event");
        assert_eq!(json["involvedObject"]["kind"], "Node");
    }
}
