//! Stackful coroutine support
//!
//! A coroutine is a closure running on its own guard-paged stack. The
//! dispatching thread resumes it from its host context; the closure yields
//! back through [`CoroContext::yield_now`]. One coroutine runs per thread
//! at a time, and a yielded coroutine may be resumed later by a different
//! thread, since its state lives entirely in heap memory.
//!
//! A panic inside the coroutine is caught on the coroutine stack, carried
//! across the switch, and re-raised on the host stack, so unwinding never
//! walks off the bottom of a foreign stack.

mod stack;

#[cfg(target_arch = "x86_64")]
#[path = "x86_64.rs"]
mod arch;

#[cfg(target_arch = "aarch64")]
#[path = "aarch64.rs"]
mod arch;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("stackful coroutines are implemented for x86_64 and aarch64 only");

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use selkie_core::Result;

pub(crate) use arch::Context;

use stack::Stack;

/// Outcome of one resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// The coroutine yielded; resume it again to continue
    Yielded,
    /// The closure returned; the coroutine is spent
    Complete,
}

/// Heap-pinned coroutine state
///
/// The entry trampoline keeps a raw pointer to this record, so it lives in
/// its own box and never moves, no matter how the owning [`Coroutine`] (or
/// the event carrying it) moves between queues and threads.
struct CoroInner {
    stack: Stack,
    ctx: Context,
    host: *mut Context,
    finished: bool,
    panic: Option<Box<dyn Any + Send>>,
    entry: Option<Box<dyn FnOnce(&mut CoroContext) + Send>>,
}

/// A spawned, resumable coroutine
pub(crate) struct Coroutine {
    inner: Box<CoroInner>,
}

// SAFETY: at most one thread resumes a coroutine at a time (the strand
// claim guarantees it), and the raw pointers inside are only dereferenced
// by that thread.
unsafe impl Send for Coroutine {}

impl Coroutine {
    /// Allocate a stack and prepare the entry context
    pub(crate) fn new(
        entry: Box<dyn FnOnce(&mut CoroContext) + Send>,
        stack_size_bytes: usize,
    ) -> Result<Self> {
        let stack = Stack::allocate(stack_size_bytes)?;
        let mut inner = Box::new(CoroInner {
            stack,
            ctx: Context::new(),
            host: ptr::null_mut(),
            finished: false,
            panic: None,
            entry: Some(entry),
        });

        let arg = &mut *inner as *mut CoroInner as usize;
        // SAFETY: ctx and the stack belong to `inner`, which is heap-pinned
        // for the coroutine's whole life.
        unsafe {
            arch::init_context(&mut inner.ctx, inner.stack.top(), coroutine_entry, arg);
        }

        Ok(Self { inner })
    }

    /// Run the coroutine until it yields or completes
    ///
    /// `host` receives the resuming thread's state and is where the
    /// coroutine switches back to. Re-raises any panic the coroutine hit.
    pub(crate) fn resume(&mut self, host: *mut Context) -> Resume {
        debug_assert!(!self.inner.finished, "resumed a completed coroutine");
        self.inner.host = host;

        // SAFETY: `host` is the caller's live context slot; `ctx` holds
        // either the prepared entry context or the state saved at the last
        // yield.
        unsafe {
            arch::switch(host, &self.inner.ctx);
        }

        if let Some(payload) = self.inner.panic.take() {
            std::panic::resume_unwind(payload);
        }
        if self.inner.finished {
            Resume::Complete
        } else {
            Resume::Yielded
        }
    }
}

/// Handle passed to the coroutine closure
pub struct CoroContext {
    inner: *mut CoroInner,
}

impl CoroContext {
    /// Suspend the coroutine and return control to the dispatching thread
    ///
    /// Returns when the coroutine is next resumed, possibly on a different
    /// thread.
    pub fn yield_now(&mut self) {
        // SAFETY: only the running coroutine calls this, and `host` was set
        // by the resume that entered it.
        unsafe {
            let inner = self.inner;
            let host = (*inner).host;
            arch::switch(&mut (*inner).ctx, host);
        }
    }
}

/// Entry point executed on the coroutine stack
extern "C" fn coroutine_entry(arg: usize) {
    let inner = arg as *mut CoroInner;

    // SAFETY: `inner` is the heap-pinned record this coroutine was built
    // around; nothing else touches it while the coroutine is running.
    let entry = unsafe { (*inner).entry.take() };
    let result = catch_unwind(AssertUnwindSafe(|| {
        if let Some(entry) = entry {
            let mut ctx = CoroContext { inner };
            entry(&mut ctx);
        }
    }));

    unsafe {
        if let Err(payload) = result {
            (*inner).panic = Some(payload);
        }
        (*inner).finished = true;
        let host = (*inner).host;
        arch::switch(&mut (*inner).ctx, host);
    }
    unreachable!("coroutine resumed after completion");
}

#[cfg(test)]
mod tests {
    use super::*;
    use selkie_core::constants::CORO_STACK_SIZE_BYTES_MIN;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_yield_and_complete() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let mut coro = Coroutine::new(
            Box::new(move |ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                ctx.yield_now();
                seen.fetch_add(1, Ordering::SeqCst);
                ctx.yield_now();
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            CORO_STACK_SIZE_BYTES_MIN,
        )
        .unwrap();

        let mut host = Context::new();
        assert_eq!(coro.resume(&mut host), Resume::Yielded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(coro.resume(&mut host), Resume::Yielded);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(coro.resume(&mut host), Resume::Complete);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_resume_moves_between_threads() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let mut coro = Coroutine::new(
            Box::new(move |ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                ctx.yield_now();
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            CORO_STACK_SIZE_BYTES_MIN,
        )
        .unwrap();

        let mut host = Context::new();
        assert_eq!(coro.resume(&mut host), Resume::Yielded);

        // Finish on another thread; the coroutine's state is heap-resident.
        let done = std::thread::spawn(move || {
            let mut host = Context::new();
            coro.resume(&mut host)
        })
        .join()
        .unwrap();

        assert_eq!(done, Resume::Complete);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_is_reraised_on_host() {
        let mut coro = Coroutine::new(
            Box::new(|ctx| {
                ctx.yield_now();
                panic!("coroutine fault");
            }),
            CORO_STACK_SIZE_BYTES_MIN,
        )
        .unwrap();

        let mut host = Context::new();
        assert_eq!(coro.resume(&mut host), Resume::Yielded);

        let caught = catch_unwind(AssertUnwindSafe(|| {
            coro.resume(&mut host);
        }));
        assert!(caught.is_err());
    }
}
