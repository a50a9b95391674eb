//! Schema registry and envelope validation
//!
//! Validation runs against the raw JSON before the typed decode so that
//! checks the type system cannot express (explicit UTC marker, positive
//! task id, non-empty user id) reject the event with a precise error
//! instead of a generic deserialization failure.

use std::collections::HashMap;

use serde_json::Value;

use crate::envelope::{EventEnvelope, EventType};
use crate::version::EventVersion;

/// Why an incoming event was rejected
#[derive(Debug, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("user_id must be non-empty")]
    EmptyUserId,

    #[error("task_id must be positive, got {0}")]
    NonPositiveTaskId(i64),

    #[error("timestamp must carry an explicit UTC marker: {0}")]
    NonUtcTimestamp(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid event version: {0}")]
    InvalidVersion(String),

    #[error("unsupported schema version {declared} for {event_type} (supported major: {supported_major})")]
    UnsupportedVersion {
        event_type: EventType,
        declared: EventVersion,
        supported_major: u8,
    },

    #[error("payload does not match event type {0}")]
    PayloadMismatch(EventType),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Registry of supported schema versions per event type
///
/// Consumers validate every incoming event against this registry before
/// touching the payload. Evolution is additive within a major version, so
/// the registry stores one supported version per type and accepts any
/// event sharing its major.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    supported: HashMap<EventType, EventVersion>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Registry with the current version of every known event type
    pub fn new() -> Self {
        let mut supported = HashMap::new();
        supported.insert(EventType::TaskCompleted, EventVersion::CURRENT);
        supported.insert(EventType::ReminderScheduled, EventVersion::CURRENT);
        supported.insert(EventType::TaskUpdated, EventVersion::CURRENT);
        Self { supported }
    }

    /// Register or override the supported version for an event type
    pub fn register(&mut self, event_type: EventType, version: EventVersion) {
        self.supported.insert(event_type, version);
    }

    pub fn supported_version(&self, event_type: EventType) -> Option<EventVersion> {
        self.supported.get(&event_type).copied()
    }

    /// Validate a raw JSON envelope and decode it
    ///
    /// Unknown fields anywhere in the envelope are ignored (additive
    /// evolution); missing required fields, empty user ids, non-positive
    /// task ids, non-UTC timestamps, unknown types and incompatible major
    /// versions are rejected.
    pub fn validate(&self, raw: &Value) -> Result<EventEnvelope, SchemaValidationError> {
        let obj = raw
            .as_object()
            .ok_or(SchemaValidationError::MissingField("event_id"))?;

        let type_str = required_str(obj, "event_type")?;
        let event_type = EventType::parse(type_str)
            .ok_or_else(|| SchemaValidationError::UnknownEventType(type_str.to_string()))?;

        let version_str = required_str(obj, "event_version")?;
        let declared: EventVersion = version_str
            .parse()
            .map_err(|_| SchemaValidationError::InvalidVersion(version_str.to_string()))?;
        let supported = self
            .supported
            .get(&event_type)
            .copied()
            .unwrap_or(EventVersion::CURRENT);
        if !supported.is_compatible_with(&declared) {
            return Err(SchemaValidationError::UnsupportedVersion {
                event_type,
                declared,
                supported_major: supported.major,
            });
        }

        required_str(obj, "event_id")?;

        let timestamp = required_str(obj, "timestamp")?;
        if !has_utc_marker(timestamp) {
            return Err(SchemaValidationError::NonUtcTimestamp(timestamp.to_string()));
        }

        let user_id = required_str(obj, "user_id")?;
        if user_id.is_empty() {
            return Err(SchemaValidationError::EmptyUserId);
        }

        let task_id = obj
            .get("task_id")
            .and_then(Value::as_i64)
            .ok_or(SchemaValidationError::MissingField("task_id"))?;
        if task_id <= 0 {
            return Err(SchemaValidationError::NonPositiveTaskId(task_id));
        }

        if !obj.contains_key("payload") {
            return Err(SchemaValidationError::MissingField("payload"));
        }

        let envelope: EventEnvelope = serde_json::from_value(raw.clone())?;
        if envelope.payload.event_type() != envelope.event_type {
            return Err(SchemaValidationError::PayloadMismatch(envelope.event_type));
        }

        Ok(envelope)
    }
}

fn required_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, SchemaValidationError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(SchemaValidationError::MissingField(field))
}

/// An explicit UTC marker is a trailing `Z` or a `+00:00` offset. A naive
/// timestamp or a non-zero offset is rejected: all arithmetic downstream
/// assumes naive UTC.
fn has_utc_marker(timestamp: &str) -> bool {
    timestamp.ends_with('Z') || timestamp.ends_with("+00:00")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_completed_event() -> Value {
        json!({
            "event_id": "0193a2a0-0000-7000-8000-000000000001",
            "event_type": "task.completed",
            "event_version": "1.0",
            "timestamp": "2025-12-29T10:00:00Z",
            "user_id": "user-1",
            "task_id": 42,
            "payload": {
                "title": "water plants",
                "completed_at": "2025-12-29T10:00:00Z"
            }
        })
    }

    #[test]
    fn test_valid_event_passes() {
        let registry = SchemaRegistry::new();
        let envelope = registry.validate(&valid_completed_event()).unwrap();
        assert_eq!(envelope.event_type, EventType::TaskCompleted);
        assert_eq!(envelope.task_id, 42);
    }

    #[test]
    fn test_missing_field_rejected() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw.as_object_mut().unwrap().remove("user_id");

        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::MissingField("user_id"))
        ));
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw["user_id"] = json!("");

        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::EmptyUserId)
        ));
    }

    #[test]
    fn test_non_positive_task_id_rejected() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw["task_id"] = json!(0);

        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::NonPositiveTaskId(0))
        ));
    }

    #[test]
    fn test_timestamp_without_utc_marker_rejected() {
        let registry = SchemaRegistry::new();

        for bad in ["2025-12-29T10:00:00", "2025-12-29T10:00:00+02:00"] {
            let mut raw = valid_completed_event();
            raw["timestamp"] = json!(bad);
            assert!(matches!(
                registry.validate(&raw),
                Err(SchemaValidationError::NonUtcTimestamp(_))
            ));
        }

        let mut raw = valid_completed_event();
        raw["timestamp"] = json!("2025-12-29T10:00:00+00:00");
        assert!(registry.validate(&raw).is_ok());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw["event_type"] = json!("task.archived");

        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_minor_version_bump_accepted_major_rejected() {
        let registry = SchemaRegistry::new();

        let mut raw = valid_completed_event();
        raw["event_version"] = json!("1.4");
        assert!(registry.validate(&raw).is_ok());

        let mut raw = valid_completed_event();
        raw["event_version"] = json!("2.0");
        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_unknown_envelope_fields_ignored() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw.as_object_mut()
            .unwrap()
            .insert("trace_id".to_string(), json!("abc"));

        assert!(registry.validate(&raw).is_ok());
    }

    #[test]
    fn test_payload_type_mismatch_rejected() {
        let registry = SchemaRegistry::new();
        let mut raw = valid_completed_event();
        raw["event_type"] = json!("reminder.scheduled");

        assert!(matches!(
            registry.validate(&raw),
            Err(SchemaValidationError::PayloadMismatch(_))
        ));
    }
}
