// Shared Event Contracts
//
// This crate defines the versioned event envelope and the payload variants
// exchanged between task services over the broker. Every consumer must be
// able to reconstruct the business intent from the envelope alone, so the
// envelope carries event id, type, version, UTC timestamp, user scope and
// task reference next to the variant-specific payload.

pub mod envelope;
pub mod payloads;
pub mod registry;
pub mod version;

pub use envelope::{
    EventEnvelope, EventPayload, EventType, DLQ_REMINDERS, DLQ_TASK_EVENTS, DLQ_TASK_UPDATES,
    TOPIC_REMINDERS, TOPIC_TASK_EVENTS,
};
pub use payloads::{
    NotificationChannel, ReminderScheduledPayload, TaskCompletedPayload, TaskUpdatedPayload,
};
pub use registry::{SchemaRegistry, SchemaValidationError};
pub use version::EventVersion;
