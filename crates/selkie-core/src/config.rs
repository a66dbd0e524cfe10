//! Configuration for the dispatch engine
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};

/// Configuration for a dispatcher
///
/// All fields have explicit defaults; `validate()` cross-checks them against
/// the crate limits. Construction of a dispatcher normalizes the
/// configuration (see [`DispatcherConfig::normalized`]), so any value the
/// dispatcher actually runs with is valid.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of OS threads the dispatcher owns
    ///
    /// Zero means "use the machine's available parallelism".
    pub thread_count: usize,

    /// Number of strands (workers)
    ///
    /// Normalized to at least `thread_count` so every thread has a prior
    /// strand to drain.
    pub worker_count: usize,

    /// Default stack size for spawned coroutines, in bytes
    pub coro_stack_size_bytes: usize,
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            worker_count: 0,
            coro_stack_size_bytes: CORO_STACK_SIZE_BYTES_DEFAULT,
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with an explicit thread count
    pub fn with_threads(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Default::default()
        }
    }

    /// Create a configuration with explicit thread and worker counts
    pub fn with_threads_and_workers(thread_count: usize, worker_count: usize) -> Self {
        Self {
            thread_count,
            worker_count,
            ..Default::default()
        }
    }

    /// Set the default coroutine stack size
    pub fn with_coro_stack_size(mut self, size_bytes: usize) -> Self {
        self.coro_stack_size_bytes = size_bytes;
        self
    }

    /// Validate the configuration against crate limits
    pub fn validate(&self) -> Result<()> {
        if self.thread_count > DISPATCH_THREAD_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "thread_count",
                format!(
                    "{} exceeds limit {}",
                    self.thread_count, DISPATCH_THREAD_COUNT_MAX
                ),
            ));
        }

        if self.worker_count > STRAND_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "worker_count",
                format!("{} exceeds limit {}", self.worker_count, STRAND_COUNT_MAX),
            ));
        }

        if self.coro_stack_size_bytes > CORO_STACK_SIZE_BYTES_MAX {
            return Err(Error::invalid_configuration(
                "coro_stack_size_bytes",
                format!(
                    "{} exceeds limit {}",
                    self.coro_stack_size_bytes, CORO_STACK_SIZE_BYTES_MAX
                ),
            ));
        }

        Ok(())
    }

    /// Normalize the configuration into the values the dispatcher runs with
    ///
    /// - `thread_count == 0` becomes the machine's available parallelism,
    ///   clamped to `DISPATCH_THREAD_COUNT_MAX`
    /// - `worker_count` is raised to at least `thread_count` and clamped to
    ///   `STRAND_COUNT_MAX`
    /// - the coroutine stack size is clamped into its min/max window
    pub fn normalized(&self) -> Self {
        let thread_count = if self.thread_count == 0 {
            default_thread_count()
        } else {
            self.thread_count
        }
        .min(DISPATCH_THREAD_COUNT_MAX);

        let worker_count = self.worker_count.max(thread_count).min(STRAND_COUNT_MAX);

        let coro_stack_size_bytes = self
            .coro_stack_size_bytes
            .clamp(CORO_STACK_SIZE_BYTES_MIN, CORO_STACK_SIZE_BYTES_MAX);

        Self {
            thread_count,
            worker_count,
            coro_stack_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_raises_worker_count() {
        let config = DispatcherConfig::with_threads_and_workers(4, 2).normalized();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_normalized_keeps_extra_workers() {
        let config = DispatcherConfig::with_threads_and_workers(4, 8).normalized();
        assert_eq!(config.worker_count, 8);
    }

    #[test]
    fn test_zero_threads_normalizes_to_parallelism() {
        let config = DispatcherConfig::with_threads(0).normalized();
        assert!(config.thread_count >= 1);
    }

    #[test]
    fn test_oversized_worker_count_is_rejected() {
        let config = DispatcherConfig::with_threads_and_workers(1, STRAND_COUNT_MAX + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stack_size_is_clamped() {
        let config = DispatcherConfig::default().with_coro_stack_size(1).normalized();
        assert_eq!(config.coro_stack_size_bytes, CORO_STACK_SIZE_BYTES_MIN);
    }
}
