// Telemetry Module
//
// Structured logging setup shared by the worker binaries. Configure via
// environment variables:
// - RUST_LOG or LOG_LEVEL: log filter (default: "<service>=info")
// - SERVICE_NAME: service name used in the default filter

use tracing_subscriber::EnvFilter;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_filter: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "taskbeat".to_string()),
            log_filter: std::env::var("RUST_LOG").ok(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "taskbeat".to_string(),
            log_filter: None,
        }
    }
}

/// Initialize structured logging
///
/// Safe to call more than once; later calls are no-ops (tests share one
/// process-global subscriber).
pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = config.log_filter.clone().unwrap_or_else(|| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        format!("{}={}", config.service_name.replace('-', "_"), level)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_derived_from_service_name() {
        let config = TelemetryConfig {
            service_name: "taskbeat-worker".to_string(),
            log_filter: None,
        };
        // Must not panic even when a subscriber is already installed.
        init_telemetry(&config);
        init_telemetry(&config);
    }
}
