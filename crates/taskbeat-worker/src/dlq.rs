//! Dead-letter routing
//!
//! An event that exhausted its retries is republished to its class's DLQ
//! topic with failure metadata attached, then an operations alert is
//! emitted. The DLQ publish must succeed; if it fails the error propagates
//! and the broker redelivers the original event rather than silently
//! dropping it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use taskbeat_core::{CapabilityError, ConsumeError, EventTransport, OpsAlerter};

use crate::retry::{EventClass, RetryPolicy};

/// Failure metadata attached to a dead-lettered event under `dlq_metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMetadata {
    pub failed_at: DateTime<Utc>,
    pub error: String,
    pub error_type: String,
    pub retry_count: u32,
    pub retention_days: u32,
}

/// Publishes exhausted events to their DLQ topic and raises an ops alert
#[derive(Clone)]
pub struct DeadLetterRouter {
    transport: Arc<dyn EventTransport>,
    alerts: Arc<dyn OpsAlerter>,
}

impl DeadLetterRouter {
    pub fn new(transport: Arc<dyn EventTransport>, alerts: Arc<dyn OpsAlerter>) -> Self {
        Self { transport, alerts }
    }

    /// Attach metadata to `event` and publish it to the class's DLQ topic
    ///
    /// The alert is best-effort; the publish is not.
    pub async fn route(
        &self,
        class: EventClass,
        partition_key: &str,
        event: Value,
        error: &ConsumeError,
        retry_count: u32,
    ) -> Result<(), CapabilityError> {
        let policy = RetryPolicy::for_class(class);
        let metadata = DlqMetadata {
            failed_at: Utc::now(),
            error: error.to_string(),
            error_type: error.error_type().to_string(),
            retry_count,
            retention_days: policy.retention_days,
        };

        let record = attach_metadata(event, &metadata)
            .map_err(|e| CapabilityError::permanent(format!("metadata serialization: {e}")))?;

        error!(
            class = %class,
            dlq_topic = policy.dlq_topic,
            retry_count,
            error = %error,
            "event exhausted retries, dead-lettering"
        );

        self.transport
            .publish(policy.dlq_topic, partition_key, record)
            .await?;

        let detail = json!({
            "class": class.as_str(),
            "dlq_topic": policy.dlq_topic,
            "partition_key": partition_key,
            "error": metadata.error,
            "error_type": metadata.error_type,
            "retry_count": retry_count,
        });
        if let Err(alert_err) = self
            .alerts
            .emit("event dead-lettered after exhausting retries", detail)
            .await
        {
            warn!(error = %alert_err, "failed to emit dead-letter ops alert");
        }

        Ok(())
    }
}

/// Merge `dlq_metadata` into the event object
///
/// Non-object events (never produced by this system, but the transport
/// type allows them) are wrapped instead of merged.
fn attach_metadata(event: Value, metadata: &DlqMetadata) -> Result<Value, serde_json::Error> {
    let metadata = serde_json::to_value(metadata)?;
    match event {
        Value::Object(mut map) => {
            map.insert("dlq_metadata".to_string(), metadata);
            Ok(Value::Object(map))
        }
        other => Ok(json!({ "event": other, "dlq_metadata": metadata })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryTransport, RecordingAlerter};
    use taskbeat_schemas::DLQ_REMINDERS;

    fn router() -> (DeadLetterRouter, Arc<InMemoryTransport>, Arc<RecordingAlerter>) {
        let transport = Arc::new(InMemoryTransport::new());
        let alerts = Arc::new(RecordingAlerter::new());
        (
            DeadLetterRouter::new(transport.clone(), alerts.clone()),
            transport,
            alerts,
        )
    }

    #[tokio::test]
    async fn test_route_attaches_metadata_and_alerts() {
        let (router, transport, alerts) = router();
        let event = json!({"event_id": "abc", "user_id": "user-1"});
        let err = ConsumeError::Transient("smtp timeout".to_string());

        router
            .route(EventClass::ReminderDue, "user-1", event, &err, 10)
            .await
            .unwrap();

        let dead = transport.published(DLQ_REMINDERS);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].partition_key, "user-1");
        assert_eq!(dead[0].message["event_id"], "abc");

        let metadata = &dead[0].message["dlq_metadata"];
        assert_eq!(metadata["error_type"], "transient");
        assert_eq!(metadata["retry_count"], 10);
        assert_eq!(metadata["retention_days"], 7);
        assert!(metadata["failed_at"].as_str().unwrap().ends_with('Z'));

        assert_eq!(alerts.alert_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let (router, transport, alerts) = router();
        transport.fail_next(1);
        let err = ConsumeError::Transient("down".to_string());

        let result = router
            .route(EventClass::TaskCompleted, "user-1", json!({}), &err, 3)
            .await;

        assert!(result.is_err());
        // No alert when the dead-letter itself never landed.
        assert_eq!(alerts.alert_count(), 0);
    }

    #[tokio::test]
    async fn test_alert_failure_is_swallowed() {
        let (router, transport, alerts) = router();
        alerts.fail_next(1);
        let err = ConsumeError::Permanent("rejected".to_string());

        router
            .route(EventClass::TaskUpdated, "user-1", json!({}), &err, 5)
            .await
            .unwrap();

        assert_eq!(transport.published("dlq-task-updates").len(), 1);
    }
}
