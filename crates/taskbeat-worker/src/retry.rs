//! Retry and dead-letter policy
//!
//! Every event class carries a fixed backoff schedule, an attempt cap, a
//! DLQ topic, and a retention window. The tables are deliberately static
//! configuration data; changing a schedule is a deploy, not a runtime
//! mutation.

use std::time::Duration;

use taskbeat_schemas::{EventType, DLQ_REMINDERS, DLQ_TASK_EVENTS, DLQ_TASK_UPDATES};

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

// Recurring-occurrence materialization: few attempts, long waits. The
// effect is idempotent and nothing downstream is waiting on it.
const TASK_COMPLETED_DELAYS: [Duration; 3] = [secs(30), secs(300), secs(1800)];

// Reminder delivery: many quick attempts. A reminder delivered hours late
// is worthless, so the whole schedule stays inside ~9 minutes.
const REMINDER_DUE_DELAYS: [Duration; 10] = [
    secs(1),
    secs(2),
    secs(4),
    secs(8),
    secs(16),
    secs(32),
    secs(64),
    secs(128),
    secs(256),
    secs(512),
];

// Update propagation: middle ground.
const TASK_UPDATED_DELAYS: [Duration; 5] = [secs(1), secs(2), secs(4), secs(8), secs(16)];

/// Retryable event class
///
/// `reminder.scheduled` events retry under the `reminder.due` class: both
/// sides of reminder handling (registration and delivery) share one
/// schedule and one DLQ topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    TaskCompleted,
    ReminderDue,
    TaskUpdated,
}

impl EventClass {
    pub fn for_event_type(event_type: EventType) -> Self {
        match event_type {
            EventType::TaskCompleted => Self::TaskCompleted,
            EventType::ReminderScheduled => Self::ReminderDue,
            EventType::TaskUpdated => Self::TaskUpdated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompleted => "task.completed",
            Self::ReminderDue => "reminder.due",
            Self::TaskUpdated => "task.updated",
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after a failed attempt
///
/// Every failure consumes its table delay, the last one included: an
/// exhausted class sleeps its final backoff and only then dead-letters,
/// so the table is the complete delay envelope of the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then retry
    RetryAfter(Duration),

    /// Attempts exhausted; sleep this long, then hand the event to the DLQ
    DeadLetterAfter(Duration),
}

/// Fixed policy for one event class
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub class: EventClass,
    pub delays: &'static [Duration],
    pub max_attempts: u32,
    pub dlq_topic: &'static str,
    pub retention_days: u32,
}

impl RetryPolicy {
    pub const fn for_class(class: EventClass) -> Self {
        match class {
            EventClass::TaskCompleted => Self {
                class,
                delays: &TASK_COMPLETED_DELAYS,
                max_attempts: 3,
                dlq_topic: DLQ_TASK_EVENTS,
                retention_days: 30,
            },
            EventClass::ReminderDue => Self {
                class,
                delays: &REMINDER_DUE_DELAYS,
                max_attempts: 10,
                dlq_topic: DLQ_REMINDERS,
                retention_days: 7,
            },
            EventClass::TaskUpdated => Self {
                class,
                delays: &TASK_UPDATED_DELAYS,
                max_attempts: 5,
                dlq_topic: DLQ_TASK_UPDATES,
                retention_days: 14,
            },
        }
    }

    pub const fn for_event_type(event_type: EventType) -> Self {
        match event_type {
            EventType::TaskCompleted => Self::for_class(EventClass::TaskCompleted),
            EventType::ReminderScheduled => Self::for_class(EventClass::ReminderDue),
            EventType::TaskUpdated => Self::for_class(EventClass::TaskUpdated),
        }
    }

    /// Decide what follows the `attempt`-th failure (1-based)
    pub fn on_failure(&self, attempt: u32) -> RetryDecision {
        // delays and max_attempts are the same length for every class, so
        // every attempt number up to the cap indexes its own delay
        let index = attempt.min(self.max_attempts).saturating_sub(1) as usize;
        let delay = self.delays[index];
        if attempt < self.max_attempts {
            RetryDecision::RetryAfter(delay)
        } else {
            RetryDecision::DeadLetterAfter(delay)
        }
    }

    /// Sum of the full delay table: the time an event spends in retry
    /// before dead-lettering
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// How long DLQ records (and idempotency marks) for this class live
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}
