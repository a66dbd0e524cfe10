//! The dispatch engine
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.
//!
//! A dispatcher owns a fixed pool of OS threads and a fixed array of
//! strands (workers). Submissions pick a strand, enqueue, and nudge the
//! strand's statically bound prior thread; each thread runs an adaptive
//! wait loop that drains its prior strands first and helps with the others
//! when its own are empty. The workshop's claim protocol keeps every strand
//! serial throughout.

use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use selkie_core::constants::{
    EV_SERVICE_COUNT_MAX, WAIT_POLL_COUNT, WAIT_POLL_SLEEP_MICROS, WAIT_SPIN_COUNT,
};
use selkie_core::{DispatcherConfig, Error, NotifyCounter, Result};

use crate::context::{self, StrandGuard, ThreadContext, ThreadMark};
use crate::coro::{Context as HostContext, CoroContext};
use crate::event::{Envelope, ErasedEventPool, Event, PoolMake, Pooled};
use crate::events::{PostEvent, SpawnEvent};
use crate::fault::{pcall, FaultInfo};
use crate::registry;
use crate::worker::{WorkLevel, Worker};
use crate::workshop::Workshop;

/// Process-wide dispatcher uid allocator; uids are never reused.
static NEXT_DISPATCHER_UID: AtomicU32 = AtomicU32::new(0);

type StartHandler = Arc<dyn Fn(&mut ThreadContext) + Send + Sync>;
type ExitHandler = Arc<dyn Fn(&mut ThreadContext) + Send + Sync>;
type FaultHandler = Arc<dyn Fn(&mut ThreadContext, &FaultInfo) + Send + Sync>;

/// Per-thread wait primitives, lifecycle queues, and flags
pub(crate) struct ThreadData {
    counter: NotifyCounter,
    mutex: Mutex<()>,
    condvar: Condvar,
    start_queue: SegQueue<StartHandler>,
    exit_queue: SegQueue<ExitHandler>,
    fault_queue: SegQueue<FaultHandler>,
    stop: CachePadded<AtomicBool>,
    host_context: CachePadded<UnsafeCell<HostContext>>,
}

// SAFETY: `host_context` is only ever touched by the dispatch thread that
// owns this slot (a coroutine resume always goes through the resuming
// thread's own slot). Every other field is a thread-safe primitive.
unsafe impl Sync for ThreadData {}

impl ThreadData {
    fn new() -> Self {
        Self {
            counter: NotifyCounter::new(),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            start_queue: SegQueue::new(),
            exit_queue: SegQueue::new(),
            fault_queue: SegQueue::new(),
            stop: CachePadded::new(AtomicBool::new(false)),
            host_context: CachePadded::new(UnsafeCell::new(HostContext::new())),
        }
    }

    #[inline]
    fn is_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Work totals since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Events drained by their strand's prior thread
    pub prior_works: u64,
    /// Events drained by minor helper threads
    pub minor_works: u64,
}

impl DispatcherStats {
    pub fn total_works(&self) -> u64 {
        self.prior_works + self.minor_works
    }
}

pub(crate) struct Inner {
    uid: u32,
    config: DispatcherConfig,
    workers: Box<[Worker]>,
    workshop: Workshop,
    threads: Box<[ThreadData]>,
    next_strand: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Every event pool any thread created for this dispatcher, kept for
    /// teardown accounting.
    pool_registry: SegQueue<Arc<dyn ErasedEventPool>>,
}

impl Inner {
    pub(crate) fn uid(&self) -> u32 {
        self.uid
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub(crate) fn strand_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn register_pool(&self, pool: Arc<dyn ErasedEventPool>) {
        self.pool_registry.push(pool);
    }

    pub(crate) fn host_context(&self, thread_index: usize) -> *mut HostContext {
        self.threads[thread_index].host_context.get()
    }

    fn select_strand(&self) -> usize {
        self.next_strand.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Enqueue on a strand and nudge its prior thread
    pub(crate) fn submit_to(&self, strand: usize, envelope: Envelope) {
        assert!(
            strand < self.workers.len(),
            "strand {} out of range ({} strands)",
            strand,
            self.workers.len()
        );
        self.workers[strand].push(envelope);
        self.notify_thread(strand);
    }

    pub(crate) fn submit(&self, envelope: Envelope) {
        self.submit_to(self.select_strand(), envelope);
    }

    fn notify_thread(&self, worker_index: usize) {
        let data = &self.threads[worker_index % self.threads.len()];
        data.counter.incr_and_notify(&data.mutex, &data.condvar);
    }

    pub(crate) fn make_event<E: Event>(&self, make: PoolMake<E>) -> Pooled<E> {
        let pool = registry::pool_for(self, make);
        let event = pool.get();
        Pooled::new(event, pool)
    }

    pub(crate) fn post(&self, handler: impl FnOnce(&mut ThreadContext) + Send + 'static) {
        let mut event = self.make_event::<PostEvent>(PoolMake::default());
        event.set_handler(handler);
        self.submit(event.into());
    }

    pub(crate) fn spawn(
        &self,
        handler: impl FnOnce(&mut CoroContext) + Send + 'static,
        stack_size_bytes: Option<usize>,
    ) {
        let mut event = self.make_event::<SpawnEvent>(PoolMake::default());
        event.set_handler(handler);
        event.set_stack_size(stack_size_bytes.unwrap_or(self.config.coro_stack_size_bytes));
        self.submit(event.into());
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Lifecycle handlers that never got a thread, and the pools the
        // registry still tracks. Workers drain their own queues on drop.
        for data in self.threads.iter() {
            while data.start_queue.pop().is_some() {}
            while data.exit_queue.pop().is_some() {}
            while data.fault_queue.pop().is_some() {}
        }
        while self.pool_registry.pop().is_some() {}
    }
}

/// The event service: submission surface, thread pool, and run loop
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Construct a dispatcher from a (normalized) configuration
    ///
    /// Draws a process-unique uid; constructing more than
    /// `EV_SERVICE_COUNT_MAX` dispatchers over a process lifetime is a
    /// fatal misuse.
    pub fn new(config: DispatcherConfig) -> Self {
        let config = config.normalized();
        debug_assert!(config.validate().is_ok());

        let uid = NEXT_DISPATCHER_UID.fetch_add(1, Ordering::Relaxed);
        assert!(
            (uid as usize) < EV_SERVICE_COUNT_MAX,
            "dispatcher budget exhausted: uid {} reached limit {}",
            uid,
            EV_SERVICE_COUNT_MAX
        );

        let workers = (0..config.worker_count)
            .map(Worker::new)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let workshop = Workshop::new(&workers);
        let threads = (0..config.thread_count)
            .map(|_| ThreadData::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        debug!(
            uid,
            threads = config.thread_count,
            strands = config.worker_count,
            "dispatcher constructed"
        );

        Self {
            inner: Arc::new(Inner {
                uid,
                config,
                workers,
                workshop,
                threads,
                next_strand: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                pool_registry: SegQueue::new(),
            }),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.inner.thread_count()
    }

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

    /// Submit a coroutine with an explicit stack size request
    pub fn spawn_with_stack(
        &self,
        handler: impl FnOnce(&mut CoroContext) + Send + 'static,
        stack_size_bytes: usize,
    ) {
        self.inner.spawn(handler, Some(stack_size_bytes));
    }

    /// Submit a user event to a round-robin-selected strand
    pub fn submit(&self, envelope: impl Into<Envelope>) {
        self.inner.submit(envelope.into());
    }

    /// Submit a user event to a specific strand
    ///
    /// Strands are numbered `0..strand_count()`; events on one strand are
    /// handled serially in submission order.
    pub fn submit_to(&self, strand: usize, envelope: impl Into<Envelope>) {
        self.inner.submit_to(strand, envelope.into());
    }

    /// Take a recycled (or fresh) event from the calling thread's pool
    pub fn make_event<E: Event>(&self, make: PoolMake<E>) -> Pooled<E> {
        self.inner.make_event(make)
    }

    /// Register a handler to run once on every thread at startup
    ///
    /// Registering after `run()` reaches only threads that have not yet
    /// executed their start phase.
    pub fn on_thread_start(&self, handler: impl Fn(&mut ThreadContext) + Send + Sync + 'static) {
        let handler: StartHandler = Arc::new(handler);
        for data in self.inner.threads.iter() {
            data.start_queue.push(Arc::clone(&handler));
        }
    }

    /// Register a handler to run once on every thread at exit
    pub fn on_thread_exit(&self, handler: impl Fn(&mut ThreadContext) + Send + Sync + 'static) {
        let handler: ExitHandler = Arc::new(handler);
        for data in self.inner.threads.iter() {
            data.exit_queue.push(Arc::clone(&handler));
        }
    }

    /// Register a handler to run on a thread that hits a fault
    ///
    /// Each registered handler runs once on the faulting thread, with the
    /// captured trace; the thread terminates afterwards while its peers
    /// keep running.
    pub fn on_thread_fault(
        &self,
        handler: impl Fn(&mut ThreadContext, &FaultInfo) + Send + Sync + 'static,
    ) {
        let handler: FaultHandler = Arc::new(handler);
        for data in self.inner.threads.iter() {
            data.fault_queue.push(Arc::clone(&handler));
        }
    }

    /// Start the thread pool and block until `stop()` has been observed and
    /// every thread has exited
    ///
    /// May be called exactly once.
    pub fn run(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let thread_count = self.inner.thread_count();
        info!(
            uid = self.inner.uid,
            threads = thread_count,
            strands = self.inner.strand_count(),
            "dispatcher starting"
        );

        let mut handles = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("selkie-{}-{}", self.inner.uid, index))
                .spawn(move || thread_main(inner, index));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Unwind whatever did start before reporting.
                    self.stop();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::ThreadSpawnFailed {
                        reason: err.to_string(),
                    });
                }
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        info!(uid = self.inner.uid, "dispatcher stopped");
        Ok(())
    }

    /// Ask every thread to exit after its current drain; returns promptly
    ///
    /// Idempotent. Events submitted after stop are enqueued but never
    /// handled; they are reclaimed when the dispatcher drops.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(uid = self.inner.uid, "dispatcher stop requested");
        for data in self.inner.threads.iter() {
            data.stop.store(true, Ordering::Relaxed);
        }
        for data in self.inner.threads.iter() {
            data.counter.incr_and_notify(&data.mutex, &data.condvar);
        }
    }

    /// Thread index of the calling thread, if it belongs to this dispatcher
    pub fn current_thread_index(&self) -> Option<usize> {
        context::current_thread_for(self.inner.uid)
    }

    /// Work totals since construction
    pub fn stats(&self) -> DispatcherStats {
        let mut stats = DispatcherStats::default();
        for worker in self.inner.workers.iter() {
            stats.prior_works += worker.prior_works();
            stats.minor_works += worker.minor_works();
        }
        stats
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

// =============================================================================
// Per-thread run loop
// =============================================================================

fn thread_main(inner: Arc<Inner>, index: usize) {
    let _mark = ThreadMark::install(inner.uid, index);
    let mut ctx = ThreadContext::new(Arc::clone(&inner), index);
    debug!(uid = inner.uid, thread = index, "dispatch thread started");

    let outcome = pcall(|| trun(&inner, index, &mut ctx));
    if let Err(fault) = &outcome {
        run_fault_handlers(&inner, index, &mut ctx, fault);
    }
    // The exit phase runs on every path out of the main loop.
    run_exit_handlers(&inner, index, &mut ctx);

    debug!(uid = inner.uid, thread = index, "dispatch thread exiting");
}

/// The main loop of one dispatch thread
fn trun(inner: &Inner, index: usize, ctx: &mut ThreadContext) {
    let data = &inner.threads[index];
    let thread_count = inner.threads.len();
    let worker_count = inner.workers.len();

    // Static binding: prior for every strand congruent to our index, minor
    // for the rest.
    let mut priors = Vec::new();
    let mut minors = Vec::new();
    for worker in 0..worker_count {
        if worker % thread_count == index {
            priors.push(worker);
        } else {
            minors.push(worker);
        }
    }

    run_start_handlers(inner, index, ctx);

    let poll_sleep = Duration::from_micros(WAIT_POLL_SLEEP_MICROS);

    // Signed: the sweeps below subtract drained counts speculatively, so
    // the budget may legitimately go negative.
    let mut expected_pworks: i64 = 0;
    while !data.is_stop() {
        if expected_pworks <= 0 {
            'wait: {
                // Tier 1: aggressive spinning.
                for _ in 0..WAIT_SPIN_COUNT {
                    expected_pworks += data.counter.reset();
                    if expected_pworks > 0 {
                        break 'wait;
                    }
                    std::hint::spin_loop();
                }
                // Tier 2: moderate polling.
                for _ in 0..WAIT_POLL_COUNT {
                    expected_pworks += data.counter.reset();
                    if expected_pworks > 0 || data.is_stop() {
                        break 'wait;
                    }
                    std::thread::sleep(poll_sleep);
                }
                // Tier 3: block until a producer signals.
                expected_pworks += data.counter.reset_or_wait(&data.mutex, &data.condvar);
            }
        }
        if data.is_stop() {
            break;
        }

        let mut pworks = 0usize;
        for &worker in &priors {
            let works = do_work(inner, ctx, worker, WorkLevel::Prior);
            pworks += works;
            expected_pworks -= works as i64;
            expected_pworks -= inner.workers[worker].take_sworks();
        }
        if pworks > 0 {
            continue;
        }

        // Our own strands were empty or busy; help elsewhere. The claim
        // still guarantees exclusivity, so strand order is preserved.
        for &worker in &minors {
            do_work(inner, ctx, worker, WorkLevel::Minor);
        }
    }
}

/// Claim one worker and drain it; the claim and strand mark are restored on
/// every exit path, unwinding included.
fn do_work(inner: &Inner, ctx: &mut ThreadContext, worker_index: usize, level: WorkLevel) -> usize {
    let Some(claim) = inner.workshop.claim(worker_index) else {
        return 0;
    };
    let _strand = StrandGuard::enter(worker_index);
    claim.worker().work(ctx, level)
}

fn run_start_handlers(inner: &Inner, index: usize, ctx: &mut ThreadContext) {
    let data = &inner.threads[index];
    while let Some(handler) = data.start_queue.pop() {
        abort_on_panic("thread start", || handler(ctx));
    }
}

fn run_exit_handlers(inner: &Inner, index: usize, ctx: &mut ThreadContext) {
    let data = &inner.threads[index];
    while let Some(handler) = data.exit_queue.pop() {
        abort_on_panic("thread exit", || handler(ctx));
    }
}

fn run_fault_handlers(inner: &Inner, index: usize, ctx: &mut ThreadContext, fault: &FaultInfo) {
    let data = &inner.threads[index];
    let mut delivered = 0usize;
    while let Some(handler) = data.fault_queue.pop() {
        delivered += 1;
        abort_on_panic("thread fault", || handler(ctx, fault));
    }
    if delivered == 0 {
        error!(
            uid = inner.uid,
            thread = index,
            %fault,
            "unhandled fault on dispatch thread"
        );
    }
}

/// Lifecycle handlers may not fail; a panic here is unrecoverable.
fn abort_on_panic(phase: &str, body: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(body)).is_err() {
        error!(phase, "panic in lifecycle handler; aborting");
        std::process::abort();
    }
}
