//! Versioned event envelope
//!
//! Wire format (JSON):
//!
//! ```json
//! {
//!   "event_id": "<uuid>",
//!   "event_type": "task.completed",
//!   "event_version": "1.0",
//!   "timestamp": "2025-12-29T10:00:00Z",
//!   "user_id": "user-1",
//!   "task_id": 42,
//!   "payload": { ... }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payloads::{ReminderScheduledPayload, TaskCompletedPayload, TaskUpdatedPayload};
use crate::version::EventVersion;

// ============================================================================
// Topics
// ============================================================================

pub const TOPIC_TASK_EVENTS: &str = "task-events";
pub const TOPIC_REMINDERS: &str = "reminders";

pub const DLQ_TASK_EVENTS: &str = "dlq-task-events";
pub const DLQ_REMINDERS: &str = "dlq-reminders";
pub const DLQ_TASK_UPDATES: &str = "dlq-task-updates";

// ============================================================================
// Event type
// ============================================================================

/// Discriminator of the envelope payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "reminder.scheduled")]
    ReminderScheduled,
    #[serde(rename = "task.updated")]
    TaskUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompleted => "task.completed",
            Self::ReminderScheduled => "reminder.scheduled",
            Self::TaskUpdated => "task.updated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task.completed" => Some(Self::TaskCompleted),
            "reminder.scheduled" => Some(Self::ReminderScheduled),
            "task.updated" => Some(Self::TaskUpdated),
            _ => None,
        }
    }

    /// Topic events of this type are published to
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TaskCompleted | Self::TaskUpdated => TOPIC_TASK_EVENTS,
            Self::ReminderScheduled => TOPIC_REMINDERS,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload enum
// ============================================================================

/// Variant-specific body of an envelope
///
/// Serialized untagged; the envelope's `event_type` field is the
/// discriminator on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    ReminderScheduled(ReminderScheduledPayload),
    TaskCompleted(TaskCompletedPayload),
    // Keep last: all fields optional, so it matches almost anything.
    TaskUpdated(TaskUpdatedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TaskCompleted(_) => EventType::TaskCompleted,
            Self::ReminderScheduled(_) => EventType::ReminderScheduled,
            Self::TaskUpdated(_) => EventType::TaskUpdated,
        }
    }

    pub fn as_task_completed(&self) -> Option<&TaskCompletedPayload> {
        match self {
            Self::TaskCompleted(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_reminder_scheduled(&self) -> Option<&ReminderScheduledPayload> {
        match self {
            Self::ReminderScheduled(p) => Some(p),
            _ => None,
        }
    }
}

impl From<TaskCompletedPayload> for EventPayload {
    fn from(p: TaskCompletedPayload) -> Self {
        Self::TaskCompleted(p)
    }
}

impl From<ReminderScheduledPayload> for EventPayload {
    fn from(p: ReminderScheduledPayload) -> Self {
        Self::ReminderScheduled(p)
    }
}

impl From<TaskUpdatedPayload> for EventPayload {
    fn from(p: TaskUpdatedPayload) -> Self {
        Self::TaskUpdated(p)
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Immutable event record as it travels over the broker
///
/// `event_id` doubles as the idempotency key; `user_id` is both the
/// isolation boundary and the partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub event_version: EventVersion,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub task_id: i64,
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Build an envelope for a payload, assigning a fresh event id and
    /// the current UTC timestamp
    pub fn new(user_id: impl Into<String>, task_id: i64, payload: impl Into<EventPayload>) -> Self {
        let payload = payload.into();
        Self {
            event_id: Uuid::now_v7(),
            event_type: payload.event_type(),
            event_version: EventVersion::CURRENT,
            timestamp: Utc::now(),
            user_id: user_id.into(),
            task_id,
            payload,
        }
    }

    /// Build an envelope with a caller-provided event id (replays, tests)
    pub fn with_id(
        event_id: Uuid,
        user_id: impl Into<String>,
        task_id: i64,
        payload: impl Into<EventPayload>,
    ) -> Self {
        let mut envelope = Self::new(user_id, task_id, payload);
        envelope.event_id = event_id;
        envelope
    }

    /// Broker partition key: all events of one user stay ordered
    pub fn partition_key(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::NotificationChannel;
    use chrono::TimeZone;

    #[test]
    fn test_envelope_assigns_id_and_type() {
        let completed_at = Utc.with_ymd_and_hms(2025, 12, 29, 10, 0, 0).unwrap();
        let envelope = EventEnvelope::new(
            "user-1",
            42,
            TaskCompletedPayload::new("water plants", completed_at),
        );

        assert_eq!(envelope.event_type, EventType::TaskCompleted);
        assert_eq!(envelope.event_version, EventVersion::CURRENT);
        assert_eq!(envelope.partition_key(), "user-1");
        assert_eq!(envelope.event_type.topic(), TOPIC_TASK_EVENTS);
    }

    #[test]
    fn test_wire_format_round_trip() {
        let due = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let payload = ReminderScheduledPayload::new(
            "standup",
            due - chrono::Duration::hours(2),
            NotificationChannel::Push,
            "device-token-1",
            due,
        )
        .with_description("daily standup");
        let envelope = EventEnvelope::new("user-2", 7, payload);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event_type"], "reminder.scheduled");
        assert_eq!(json["event_version"], "1.0");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_untagged_payload_resolves_by_shape() {
        let json = serde_json::json!({
            "event_id": "0193a2a0-0000-7000-8000-000000000000",
            "event_type": "task.completed",
            "event_version": "1.0",
            "timestamp": "2025-12-29T10:00:00Z",
            "user_id": "user-1",
            "task_id": 1,
            "payload": {
                "title": "water plants",
                "completed_at": "2025-12-29T10:00:00Z",
                "recurring_pattern": "DAILY"
            }
        });

        let envelope: EventEnvelope = serde_json::from_value(json).unwrap();
        let payload = envelope.payload.as_task_completed().unwrap();
        assert_eq!(payload.recurring_pattern.as_deref(), Some("DAILY"));
    }
}
