//! Workers
//!
//! A worker owns one MPSC event queue and is the unit of serialization: the
//! workshop hands it to at most one thread at a time, so draining it runs
//! events in queue order with no overlap. A worker is a strand.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use tracing::debug;

use crate::context::ThreadContext;
use crate::event::{Control, Envelope};

/// Whether the draining thread is the worker's statically bound prior
/// thread or an opportunistic minor helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkLevel {
    Prior,
    Minor,
}

pub(crate) struct Worker {
    index: usize,
    queue: SegQueue<Envelope>,
    /// Events drained by minor threads since the prior thread's last sweep.
    /// The prior thread subtracts these from its pending-work budget so
    /// stolen work does not leave it spinning on a phantom positive count.
    sworks: AtomicI64,
    prior_works: AtomicU64,
    minor_works: AtomicU64,
}

impl Worker {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            queue: SegQueue::new(),
            sworks: AtomicI64::new(0),
            prior_works: AtomicU64::new(0),
            minor_works: AtomicU64::new(0),
        }
    }

    /// Enqueue an envelope; wait-free for producers
    pub(crate) fn push(&self, envelope: Envelope) {
        self.queue.push(envelope);
    }

    /// Drain the queue to exhaustion under `ctx`
    ///
    /// Must only run while the caller holds this worker's workshop claim.
    /// Returns the number of events handled, re-enqueued resumes included.
    pub(crate) fn work(&self, ctx: &mut ThreadContext, level: WorkLevel) -> usize {
        let mut works = 0usize;
        while let Some(envelope) = self.queue.pop() {
            works += 1;
            let Envelope { event, pool } = envelope;
            match event.handle(ctx) {
                Control::Release(event) => match &pool {
                    Some(pool) => pool.recycle_boxed(event),
                    None => drop(event),
                },
                Control::Again(event) => self.queue.push(Envelope { event, pool }),
                Control::Detach => {}
            }
        }

        match level {
            WorkLevel::Prior => {
                self.prior_works.fetch_add(works as u64, Ordering::Relaxed);
            }
            WorkLevel::Minor => {
                self.minor_works.fetch_add(works as u64, Ordering::Relaxed);
                self.sworks.fetch_add(works as i64, Ordering::Relaxed);
            }
        }
        works
    }

    /// Fetch-and-clear the minor-drain count; called by the prior thread
    pub(crate) fn take_sworks(&self) -> i64 {
        self.sworks.swap(0, Ordering::Relaxed)
    }

    pub(crate) fn prior_works(&self) -> u64 {
        self.prior_works.load(Ordering::Relaxed)
    }

    pub(crate) fn minor_works(&self) -> u64 {
        self.minor_works.load(Ordering::Relaxed)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Residual events go back to their pools; unpooled ones just drop.
        let mut drained = 0usize;
        while let Some(envelope) = self.queue.pop() {
            drained += 1;
            if let Some(pool) = envelope.pool {
                pool.recycle_boxed(envelope.event);
            }
        }
        if drained > 0 {
            debug!(worker = self.index, drained, "worker dropped with queued events");
        }
    }
}
