//! Telemetry bootstrap
//!
//! TigerStyle: Explicit telemetry configuration with bounded resource usage.
//!
//! Sets up the tracing subscriber used by the engine's structured logging.
//! The engine itself only emits `tracing` events; wiring them to an output
//! is the embedding application's choice, and this module provides the
//! stdout default.

use crate::error::{Error, Result};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name reported in log output
    pub service_name: String,
    /// Whether to install a stdout fmt layer
    pub stdout_enabled: bool,
    /// Log level filter (overridden by `RUST_LOG` when set)
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "selkie".to_string(),
            stdout_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout logging
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads `RUST_LOG` for the level filter (default: "info").
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        Self {
            log_level,
            ..Default::default()
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Installs an env-filter-driven subscriber with an optional stdout fmt
/// layer. Fails if a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer())
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            reason: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "selkie");
        assert!(config.stdout_enabled);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("test-service")
            .with_log_level("debug")
            .without_stdout();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, "debug");
        assert!(!config.stdout_enabled);
    }
}
