//! Idempotency guard
//!
//! Check-before-effect, mark-after-effect. The guard never marks an event
//! before its business effect has committed: a crash in between redelivers
//! the event and the effect runs again, which the effect itself must
//! tolerate (the task store's uniqueness constraint covers the one
//! non-idempotent effect we have).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use taskbeat_core::{CapabilityError, IdempotencyStore};

/// Key under which a processed event is recorded
pub fn processed_key(event_id: Uuid) -> String {
    format!("event-processed-{event_id}")
}

/// Wraps the idempotency store with the processed-event convention
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    /// True when this event id has already been marked processed
    ///
    /// A store failure here is transient: the caller must not guess and
    /// must let the event be retried.
    pub async fn already_processed(&self, event_id: Uuid) -> Result<bool, CapabilityError> {
        let existing = self.store.get(&processed_key(event_id)).await?;
        Ok(existing.is_some())
    }

    /// Record the event as processed, expiring after `retention`
    pub async fn mark_processed(
        &self,
        event_id: Uuid,
        retention: Option<Duration>,
    ) -> Result<(), CapabilityError> {
        let value = json!({
            "processed": true,
            "processed_at": Utc::now(),
        });
        self.store
            .set(&processed_key(event_id), value, retention)
            .await
    }
}
