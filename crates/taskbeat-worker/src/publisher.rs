//! Event publisher
//!
//! Producer-side entry point: wraps a payload in a fresh envelope, routes
//! it to the topic its event type belongs to, and partitions by user so
//! one user's events are totally ordered.

use std::sync::Arc;

use tracing::debug;

use taskbeat_core::{CapabilityError, EventTransport};
use taskbeat_schemas::{EventEnvelope, EventPayload};

/// Publishing failure
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] CapabilityError),
}

/// Publishes envelopes over an injected transport
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn EventTransport>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    /// Wrap `payload` in a new envelope (fresh id, current timestamp) and
    /// publish it; returns the envelope so callers can log or correlate
    pub async fn publish(
        &self,
        user_id: impl Into<String>,
        task_id: i64,
        payload: impl Into<EventPayload>,
    ) -> Result<EventEnvelope, PublishError> {
        let envelope = EventEnvelope::new(user_id, task_id, payload);
        self.publish_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Publish an already-built envelope (redelivery, tests)
    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let topic = envelope.event_type.topic();
        let message = serde_json::to_value(envelope)?;

        debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            topic,
            partition_key = %envelope.partition_key(),
            "publishing event"
        );

        self.transport
            .publish(topic, envelope.partition_key(), message)
            .await?;
        Ok(())
    }
}
