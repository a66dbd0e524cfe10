//! Per-thread dispatch context
//!
//! Every handler receives a `&mut ThreadContext` for the thread running it.
//! The context identifies the thread, exposes the strand currently being
//! drained, and re-exposes the submission surface so handlers can enqueue
//! follow-up work.
//!
//! The strand and thread marks live in plain thread-local cells; only the
//! owning thread ever writes them.

use std::cell::Cell;
use std::sync::Arc;

use crate::coro::CoroContext;
use crate::dispatcher::Inner;
use crate::event::{Envelope, Event, PoolMake, Pooled};

thread_local! {
    /// Index of the strand this thread currently holds, or MAX when idle.
    static CURRENT_STRAND: Cell<usize> = const { Cell::new(usize::MAX) };

    /// (dispatcher uid, thread index) when running on a dispatch thread.
    static CURRENT_THREAD: Cell<(u32, usize)> = const { Cell::new((u32::MAX, usize::MAX)) };
}

/// Marks the current thread as draining a strand; restores on drop
pub(crate) struct StrandGuard {
    previous: usize,
}

impl StrandGuard {
    pub(crate) fn enter(strand: usize) -> Self {
        let previous = CURRENT_STRAND.with(|cell| cell.replace(strand));
        Self { previous }
    }
}

impl Drop for StrandGuard {
    fn drop(&mut self) {
        CURRENT_STRAND.with(|cell| cell.set(self.previous));
    }
}

/// Marks the current thread as belonging to a dispatcher; cleared on drop
pub(crate) struct ThreadMark {
    previous: (u32, usize),
}

impl ThreadMark {
    pub(crate) fn install(uid: u32, thread_index: usize) -> Self {
        let previous = CURRENT_THREAD.with(|cell| cell.replace((uid, thread_index)));
        Self { previous }
    }
}

impl Drop for ThreadMark {
    fn drop(&mut self) {
        CURRENT_THREAD.with(|cell| cell.set(self.previous));
    }
}

/// Thread index on the given dispatcher, if the caller runs on one of its
/// dispatch threads
pub(crate) fn current_thread_for(uid: u32) -> Option<usize> {
    let (marked_uid, index) = CURRENT_THREAD.with(Cell::get);
    (marked_uid == uid).then_some(index)
}

/// Execution context of one dispatch thread
pub struct ThreadContext {
    inner: Arc<Inner>,
    thread_index: usize,
}

impl ThreadContext {
    pub(crate) fn new(inner: Arc<Inner>, thread_index: usize) -> Self {
        Self {
            inner,
            thread_index,
        }
    }

    /// Logical index of this thread within its dispatcher
    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    /// Strand currently being drained by this thread, if any
    pub fn current_strand(&self) -> Option<usize> {
        let strand = CURRENT_STRAND.with(Cell::get);
        (strand != usize::MAX).then_some(strand)
    }

    /// Number of threads the dispatcher owns
    pub fn thread_count(&self) -> usize {
        self.inner.thread_count()
    }

    /// Number of strands the dispatcher owns
    pub fn strand_count(&self) -> usize {
        self.inner.strand_count()
    }

    /// Submit a callback to a round-robin-selected strand
    pub fn post(&self, handler: impl FnOnce(&mut ThreadContext) + Send + 'static) {
        self.inner.post(handler);
    }

    /// Submit a coroutine to a round-robin-selected strand
    pub fn spawn(&self, handler: impl FnOnce(&mut CoroContext) + Send + 'static) {
        self.inner.spawn(handler, None);
    }

    /// Submit an event to a round-robin-selected strand
    pub fn submit(&self, envelope: impl Into<Envelope>) {
        self.inner.submit(envelope.into());
    }

    /// Submit an event to a specific strand
    pub fn submit_to(&self, strand: usize, envelope: impl Into<Envelope>) {
        self.inner.submit_to(strand, envelope.into());
    }

    /// Take a recycled (or fresh) event from this thread's pool for `E`
    pub fn make_event<E: Event>(&self, make: PoolMake<E>) -> Pooled<E> {
        self.inner.make_event(make)
    }

    pub(crate) fn host_context(&self) -> *mut crate::coro::Context {
        self.inner.host_context(self.thread_index)
    }
}
