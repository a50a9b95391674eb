//! # Taskbeat Worker
//!
//! Consumer side of the task lifecycle backbone:
//!
//! - **Publisher**: wraps payloads in versioned envelopes and partitions
//!   by user
//! - **Idempotency guard**: check-before-effect, mark-after-effect
//! - **Dispatch**: typed consumer registry keyed by event type
//! - **Consumers**: recurring-occurrence materialization and reminder
//!   scheduling/delivery
//! - **Retry/DLQ**: fixed per-class backoff schedules, dead-letter topics
//!   with failure metadata
//! - **Pipeline**: drives one event to consumed, rejected, or dead-lettered
//!
//! The in-memory implementations in [`memory`] back the test suite and the
//! local harness binary; deployments swap in broker-backed ones.

pub mod config;
pub mod consumers;
pub mod dispatch;
pub mod dlq;
pub mod idempotency;
pub mod memory;
pub mod pipeline;
pub mod publisher;
pub mod retry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::consumers::{RecurringTaskConsumer, ReminderConsumer};
    pub use crate::dispatch::{ConsumerRegistry, EventConsumer};
    pub use crate::dlq::DeadLetterRouter;
    pub use crate::idempotency::IdempotencyGuard;
    pub use crate::pipeline::{EventPipeline, PipelineOutcome};
    pub use crate::publisher::EventPublisher;
    pub use crate::retry::{EventClass, RetryDecision, RetryPolicy};
}

pub use config::WorkerConfig;
pub use consumers::{DeliveryOutcome, RecurringTaskConsumer, ReminderConsumer, ReminderJobData};
pub use dispatch::{ConsumerRegistry, EventConsumer};
pub use dlq::{DeadLetterRouter, DlqMetadata};
pub use idempotency::IdempotencyGuard;
pub use pipeline::{EventPipeline, PipelineOutcome};
pub use publisher::{EventPublisher, PublishError};
pub use retry::{EventClass, RetryDecision, RetryPolicy};
