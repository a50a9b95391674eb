//! Worker configuration
//!
//! Environment variables:
//! - WORKER_ID: stable identifier for logs (default: random)
//! - MAX_CONCURRENT_EVENTS: in-flight event cap (default: 16)

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_concurrent_events: usize,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            max_concurrent_events: std::env::var("MAX_CONCURRENT_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_concurrent_events),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("taskbeat-worker-{}", Uuid::now_v7()),
            max_concurrent_events: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.worker_id.starts_with("taskbeat-worker-"));
        assert_eq!(config.max_concurrent_events, 16);
    }
}
