//! Event schema versioning
//!
//! Versions follow a `major.minor` scheme. Evolution within a major version
//! is additive only (new optional fields), so a consumer accepts any event
//! whose major version matches one it supports and ignores unknown fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a version string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event version: {0}")]
pub struct InvalidVersion(pub String);

/// Schema version of an event, serialized as `"major.minor"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventVersion {
    pub major: u8,
    pub minor: u8,
}

impl EventVersion {
    /// Version written by current producers
    pub const CURRENT: EventVersion = EventVersion { major: 1, minor: 0 };

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether an event tagged `other` can be consumed by code that was
    /// written against `self`. Minor bumps are additive, so only the major
    /// version has to match.
    pub fn is_compatible_with(&self, other: &EventVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for EventVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for EventVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or_else(|| InvalidVersion(s.to_string()))?;
        let major = major.parse().map_err(|_| InvalidVersion(s.to_string()))?;
        let minor = minor.parse().map_err(|_| InvalidVersion(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl Serialize for EventVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EventVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: EventVersion = "1.0".parse().unwrap();
        assert_eq!(v, EventVersion::new(1, 0));
        assert_eq!(v.to_string(), "1.0");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<EventVersion>().is_err());
        assert!("1".parse::<EventVersion>().is_err());
        assert!("a.b".parse::<EventVersion>().is_err());
        assert!("1.0.0".parse::<EventVersion>().is_err());
    }

    #[test]
    fn test_minor_bumps_are_compatible() {
        let consumer = EventVersion::new(1, 0);
        assert!(consumer.is_compatible_with(&EventVersion::new(1, 3)));
        assert!(!consumer.is_compatible_with(&EventVersion::new(2, 0)));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&EventVersion::CURRENT).unwrap();
        assert_eq!(json, "\"1.0\"");

        let parsed: EventVersion = serde_json::from_str("\"2.1\"").unwrap();
        assert_eq!(parsed, EventVersion::new(2, 1));
    }
}
