//! Consumer error taxonomy
//!
//! Consumers never let a failure escape to the broker without first
//! classifying it: validation and permanent failures are logged and the
//! event is marked processed (poison-message protection); only transient
//! failures are retryable.

use crate::capabilities::CapabilityError;
use crate::recurrence::InvalidPatternError;

/// Classified failure while consuming one event
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    /// Malformed envelope or missing required field; never retried
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unparseable recurrence pattern; never retried (retrying cannot fix
    /// bad data), but surfaced to the caller for alerting
    #[error(transparent)]
    InvalidPattern(#[from] InvalidPatternError),

    /// Permanently rejected by a downstream capability; never retried
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Infrastructure hiccup; retried per the event class's policy
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ConsumeError {
    /// Whether the caller may retry the whole event
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine-readable tag, recorded in DLQ metadata
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::Permanent(_) => "permanent",
            Self::Transient(_) => "transient",
        }
    }
}

impl From<CapabilityError> for ConsumeError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Transient(msg) => Self::Transient(msg),
            CapabilityError::Permanent(msg) => Self::Permanent(msg),
        }
    }
}

/// Terminal result of consuming one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Business effect committed and event marked processed
    Processed,

    /// Idempotency guard saw the event before; nothing done
    Duplicate,

    /// Marked processed without a business effect (non-recurring task,
    /// recurrence ended, ...)
    Skipped(&'static str),
}
