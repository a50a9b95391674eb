//! Typed consumer dispatch
//!
//! Consumers register the event types they handle; the registry routes a
//! validated envelope to the matching consumer. An event type with no
//! registered consumer is a wiring bug surfaced as a validation error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use taskbeat_core::{ConsumeError, ConsumeOutcome};
use taskbeat_schemas::{EventEnvelope, EventType};

/// One consumer: handles a fixed set of event types
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Event types this consumer is registered for
    fn event_types(&self) -> &'static [EventType];

    /// Process one validated envelope to a terminal outcome
    ///
    /// Must be safe to call again with the same envelope (at-least-once
    /// delivery); the idempotency guard inside each consumer makes the
    /// replay a `Duplicate`.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<ConsumeOutcome, ConsumeError>;
}

/// Routes envelopes to consumers by event type
#[derive(Default)]
pub struct ConsumerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventConsumer>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for every event type it declares
    ///
    /// Last registration wins on conflict.
    pub fn register(&mut self, consumer: Arc<dyn EventConsumer>) {
        for event_type in consumer.event_types() {
            self.handlers.insert(*event_type, consumer.clone());
        }
    }

    pub fn handles(&self, event_type: EventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    pub async fn dispatch(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<ConsumeOutcome, ConsumeError> {
        let handler = self.handlers.get(&envelope.event_type).ok_or_else(|| {
            ConsumeError::Validation(format!(
                "no consumer registered for event type {}",
                envelope.event_type
            ))
        })?;
        handler.handle(envelope).await
    }
}
