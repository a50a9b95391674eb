//! Capability traits
//!
//! Everything the consumers talk to - broker, idempotency store, job
//! scheduler, task store, notification senders - is consumed as an
//! injected interface. Implementations live at the edges (and in
//! `taskbeat-worker::memory` for tests); nothing here touches a wire
//! protocol.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error from a capability call
///
/// The transient/permanent split is the contract consumers rely on:
/// transient failures are retried per policy, permanent failures are not
/// (retrying cannot fix them).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Remote call failed for a reason that may heal (network, temporary
    /// unavailability)
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call can never succeed as issued (rejected input, missing
    /// resource)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ============================================================================
// Event transport
// ============================================================================

/// Abstract pub/sub capability (at-least-once delivery)
///
/// The partition key scopes ordering: the broker delivers all messages
/// sharing a key to the same consumer instance, in publish order.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        message: Value,
    ) -> Result<(), CapabilityError>;
}

// ============================================================================
// Idempotency store
// ============================================================================

/// Durable key/value store backing the idempotency guard
///
/// Survives restarts and is shared across consumer instances; in-process
/// memory does not qualify outside of tests.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CapabilityError>;

    /// Write a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), CapabilityError>;

    async fn delete(&self, key: &str) -> Result<(), CapabilityError>;
}

// ============================================================================
// Job scheduling
// ============================================================================

/// A job registration: exact-time one-shot or cron-like recurring
///
/// `due_time` and `schedule` are mutually exclusive; the constructors
/// enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Deterministic name; at most one live job exists per name
    pub name: String,

    /// Exact fire time (one-shot jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_time: Option<DateTime<Utc>>,

    /// Cron-like expression (recurring jobs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Opaque payload handed back on fire
    pub data: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeats: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
}

impl JobSpec {
    /// Job that fires exactly once at `due_time`
    pub fn one_shot(name: impl Into<String>, due_time: DateTime<Utc>, data: Value) -> Self {
        Self {
            name: name.into(),
            due_time: Some(due_time),
            schedule: None,
            data,
            repeats: None,
            ttl: None,
        }
    }

    /// Job that fires on a cron-like schedule
    pub fn recurring(name: impl Into<String>, schedule: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            due_time: None,
            schedule: Some(schedule.into()),
            data,
            repeats: None,
            ttl: None,
        }
    }

    pub fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = Some(repeats);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_one_shot(&self) -> bool {
        self.due_time.is_some()
    }
}

/// Exact-time job scheduling capability (consumed, not implemented here)
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule_job(&self, spec: JobSpec) -> Result<(), CapabilityError>;

    /// Delete a job by its deterministic name; deleting a missing job is
    /// not an error
    async fn delete_job(&self, name: &str) -> Result<(), CapabilityError>;
}

// ============================================================================
// Task materialization
// ============================================================================

/// A task to be created in the external task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub user_id: String,
    pub due_date: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_occurrence: Option<DateTime<Utc>>,

    /// Back-reference to the task this occurrence was spawned from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<i64>,

    pub completed: bool,
}

/// Task-creation capability
#[async_trait]
pub trait TaskMaterializer: Send + Sync {
    /// Create a task, returning its id
    ///
    /// Implementations are expected to enforce a uniqueness constraint on
    /// `(parent_task_id, due_date)` so that two consumers racing on the
    /// same completion event cannot materialize the occurrence twice.
    async fn create_task(&self, task: NewTask) -> Result<i64, CapabilityError>;
}

/// Reminder bookkeeping on the task store (best-effort)
#[async_trait]
pub trait ReminderTracker: Send + Sync {
    async fn mark_reminder_sent(&self, user_id: &str, task_id: i64)
        -> Result<(), CapabilityError>;
}

// ============================================================================
// Notification
// ============================================================================

/// Channel-specific notification sender
///
/// One implementation per channel (email, push); the reminder consumer
/// picks the sender matching the event's channel.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn send_reminder(
        &self,
        to: &str,
        title: &str,
        description: Option<&str>,
        due_date: DateTime<Utc>,
        task_id: i64,
    ) -> Result<(), CapabilityError>;

    /// Lower-urgency notice that a reminder could not be delivered
    async fn send_failure_alert(
        &self,
        to: &str,
        title: &str,
        task_id: i64,
    ) -> Result<(), CapabilityError>;
}

// ============================================================================
// Operations alerting
// ============================================================================

/// Sink for operator-facing alerts (paging, incident channel)
#[async_trait]
pub trait OpsAlerter: Send + Sync {
    async fn emit(&self, summary: &str, detail: Value) -> Result<(), CapabilityError>;
}
