//! # Taskbeat Core
//!
//! Runtime abstractions shared by the event consumers:
//!
//! - **Recurrence engine**: pure computation of the next occurrence of a
//!   repeating schedule (RFC 5545 subset), no clock reads, no I/O
//! - **Capability traits**: the broker, job scheduler, task store,
//!   notification senders and idempotency store are consumed as injected
//!   interfaces, never embedded
//! - **Error taxonomy**: validation / permanent / transient split that
//!   decides what gets retried and what gets marked processed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Event Consumers                       │
//! │   (validate → dedupe → business effect → commit)         │
//! └──────────────────────────────────────────────────────────┘
//!               │                         │
//!               ▼                         ▼
//!      recurrence::calculate_next   capability traits
//!      (pure, deterministic)        (transport, scheduler, store)
//! ```

pub mod capabilities;
pub mod error;
pub mod recurrence;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::capabilities::{
        CapabilityError, EventTransport, IdempotencyStore, JobScheduler, JobSpec, NewTask,
        OpsAlerter, ReminderNotifier, ReminderTracker, TaskMaterializer,
    };
    pub use crate::error::{ConsumeError, ConsumeOutcome};
    pub use crate::recurrence::{calculate_next, InvalidPatternError};
}

pub use capabilities::{
    CapabilityError, EventTransport, IdempotencyStore, JobScheduler, JobSpec, NewTask, OpsAlerter,
    ReminderNotifier, ReminderTracker, TaskMaterializer,
};
pub use error::{ConsumeError, ConsumeOutcome};
pub use recurrence::{calculate_next, InvalidPatternError};
