//! Variant-specific event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel a reminder notification is delivered over
///
/// Hashable: consumers key their per-channel sender maps on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Push,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Payload of a `task.completed` event
///
/// `recurring_pattern == None` means no next occurrence is ever produced
/// for this event. `next_occurrence` is an optional hint pre-computed by
/// the producer; consumers may use it instead of re-running the recurrence
/// engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletedPayload {
    /// Task title, carried for logging and for the next occurrence
    pub title: String,

    /// When the task was completed
    pub completed_at: DateTime<Utc>,

    /// Original due date, preferred over `completed_at` as recurrence anchor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    /// Recurrence rule (simplified keyword or RFC 5545 subset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_pattern: Option<String>,

    /// Inclusive end boundary of the recurrence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<DateTime<Utc>>,

    /// Pre-computed next occurrence, if the producer already derived it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_occurrence: Option<DateTime<Utc>>,
}

impl TaskCompletedPayload {
    pub fn new(title: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            completed_at,
            due_date: None,
            recurring_pattern: None,
            recurring_end_date: None,
            next_occurrence: None,
        }
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_recurrence(mut self, pattern: impl Into<String>) -> Self {
        self.recurring_pattern = Some(pattern.into());
        self
    }

    pub fn with_recurrence_end(mut self, end: DateTime<Utc>) -> Self {
        self.recurring_end_date = Some(end);
        self
    }

    pub fn with_next_occurrence(mut self, next: DateTime<Utc>) -> Self {
        self.next_occurrence = Some(next);
        self
    }
}

/// Payload of a `reminder.scheduled` event
///
/// `reminder_at` is derived upstream as `due_date - offset` with the offset
/// bounded to [1, 168] hours; this crate trusts that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderScheduledPayload {
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When the reminder fires (UTC)
    pub reminder_at: DateTime<Utc>,

    pub channel: NotificationChannel,

    /// Delivery address for the channel (email address, push token)
    pub deliver_to: String,

    /// Due date of the owning task, carried for message context only
    pub due_date: DateTime<Utc>,
}

impl ReminderScheduledPayload {
    pub fn new(
        title: impl Into<String>,
        reminder_at: DateTime<Utc>,
        channel: NotificationChannel,
        deliver_to: impl Into<String>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            reminder_at,
            channel,
            deliver_to: deliver_to.into(),
            due_date,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Payload of a `task.updated` event: snapshot of the fields that changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdatedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_pattern: Option<String>,
}
