//! Notify counter
//!
//! A counted semaphore shared between many producers and a single consumer.
//! Producers increment and signal; the consumer atomically drains the count,
//! optionally blocking when it is zero. The increment happens before the
//! signal and the drain happens under the same mutex the signal is sent
//! under, which is what makes wakeups lossless:
//!
//! - a producer that signals after the consumer entered the wait delivers a
//!   condvar wake
//! - a producer that signals before the consumer entered the wait is
//!   observed by the drain returning a positive delta

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, Ordering};

/// Multi-producer single-consumer notify counter
///
/// The mutex and condvar are owned by the caller so one pair can serve
/// several counters if needed; the engine gives each thread its own pair.
#[derive(Debug, Default)]
pub struct NotifyCounter {
    pending: AtomicI64,
}

impl NotifyCounter {
    pub const fn new() -> Self {
        Self {
            pending: AtomicI64::new(0),
        }
    }

    /// Increment the counter and signal the consumer
    ///
    /// The increment is published with release ordering before the signal is
    /// sent under the mutex, pairing with the acquire drain in `reset`.
    pub fn incr_and_notify(&self, mutex: &Mutex<()>, condvar: &Condvar) {
        self.pending.fetch_add(1, Ordering::Release);
        let _guard = mutex.lock();
        condvar.notify_one();
    }

    /// Atomically drain the counter, returning the accumulated delta
    ///
    /// Lock-free; may return zero.
    pub fn reset(&self) -> i64 {
        self.pending.swap(0, Ordering::Acquire)
    }

    /// Drain the counter, blocking on the condvar while it is zero
    ///
    /// Must only be called by the single consumer.
    pub fn reset_or_wait(&self, mutex: &Mutex<()>, condvar: &Condvar) -> i64 {
        let mut guard = mutex.lock();
        loop {
            let delta = self.pending.swap(0, Ordering::Acquire);
            if delta != 0 {
                return delta;
            }
            condvar.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_reset_returns_accumulated_delta() {
        let counter = NotifyCounter::new();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        assert_eq!(counter.reset(), 0);

        counter.incr_and_notify(&mutex, &condvar);
        counter.incr_and_notify(&mutex, &condvar);
        counter.incr_and_notify(&mutex, &condvar);

        assert_eq!(counter.reset(), 3);
        assert_eq!(counter.reset(), 0);
    }

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let counter = NotifyCounter::new();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        counter.incr_and_notify(&mutex, &condvar);

        // The increment landed before the consumer entered the wait path, so
        // the drain must observe it without blocking.
        assert_eq!(counter.reset_or_wait(&mutex, &condvar), 1);
    }

    #[test]
    fn test_wait_is_woken_by_producer() {
        struct Shared {
            counter: NotifyCounter,
            mutex: Mutex<()>,
            condvar: Condvar,
        }

        let shared = Arc::new(Shared {
            counter: NotifyCounter::new(),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.counter.reset_or_wait(&shared.mutex, &shared.condvar))
        };

        // Give the consumer time to block.
        std::thread::sleep(Duration::from_millis(50));
        shared.counter.incr_and_notify(&shared.mutex, &shared.condvar);

        assert_eq!(consumer.join().unwrap(), 1);
    }
}
