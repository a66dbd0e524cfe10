//! TigerStyle constants for Selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Dispatcher Limits
// =============================================================================

/// Maximum number of coexisting dispatchers in one process
///
/// Dispatcher uids are drawn from a monotonic counter and are never reused,
/// so this bounds the total number of dispatchers a process may ever create.
pub const EV_SERVICE_COUNT_MAX: usize = 64;

/// Maximum number of dispatch threads per dispatcher
pub const DISPATCH_THREAD_COUNT_MAX: usize = 256;

/// Maximum number of strands (workers) per dispatcher
pub const STRAND_COUNT_MAX: usize = 65_536;

// =============================================================================
// Wait Loop Tuning
// =============================================================================

/// Aggressive spin iterations before an idle thread starts sleeping
pub const WAIT_SPIN_COUNT: usize = 100;

/// Moderate polling iterations before an idle thread blocks on its condvar
pub const WAIT_POLL_COUNT: usize = 500;

/// Sleep between moderate polling iterations, in microseconds
pub const WAIT_POLL_SLEEP_MICROS: u64 = 50;

// =============================================================================
// Coroutine Limits
// =============================================================================

/// Minimum coroutine stack size in bytes (16 KiB)
pub const CORO_STACK_SIZE_BYTES_MIN: usize = 16 * 1024;

/// Default coroutine stack size in bytes (256 KiB)
pub const CORO_STACK_SIZE_BYTES_DEFAULT: usize = 256 * 1024;

/// Maximum coroutine stack size in bytes (8 MiB)
pub const CORO_STACK_SIZE_BYTES_MAX: usize = 8 * 1024 * 1024;

// Compile-time assertions for constant validity
const _: () = {
    assert!(EV_SERVICE_COUNT_MAX >= 2);
    assert!(DISPATCH_THREAD_COUNT_MAX >= 1);
    assert!(STRAND_COUNT_MAX >= DISPATCH_THREAD_COUNT_MAX);
    assert!(CORO_STACK_SIZE_BYTES_MIN <= CORO_STACK_SIZE_BYTES_DEFAULT);
    assert!(CORO_STACK_SIZE_BYTES_DEFAULT <= CORO_STACK_SIZE_BYTES_MAX);
    assert!(WAIT_SPIN_COUNT > 0);
    assert!(WAIT_POLL_COUNT > 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_reasonable() {
        // A strand must always have a prior thread to bind to.
        assert!(STRAND_COUNT_MAX >= DISPATCH_THREAD_COUNT_MAX);
        // Stack sizes are page-granular on every supported platform.
        assert_eq!(CORO_STACK_SIZE_BYTES_MIN % 4096, 0);
        assert_eq!(CORO_STACK_SIZE_BYTES_MAX % 4096, 0);
    }
}
