//! Error types for Selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.
//!
//! The submission surface of the engine is deliberately infallible: posting
//! work to a live dispatcher cannot fail. Errors exist only at the edges:
//! configuration validation, lifecycle misuse, and telemetry bootstrap.

use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Dispatcher already started: run() must be called exactly once")]
    AlreadyStarted,

    #[error("Thread spawn failed: {reason}")]
    ThreadSpawnFailed { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_configuration("thread_count", "must be positive");
        assert!(err.to_string().contains("thread_count"));
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_already_started_display() {
        let err = Error::AlreadyStarted;
        assert!(err.to_string().contains("exactly once"));
    }
}
