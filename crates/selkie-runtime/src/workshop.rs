//! Workshop
//!
//! The claim board mediating worker exclusivity: one atomic slot per
//! worker, holding the worker pointer while idle and null while some thread
//! drains it. Claiming is a single swap; the claim restores the slot on
//! drop, on every exit path including unwinding.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::worker::Worker;

pub(crate) struct Workshop {
    slots: Box<[AtomicPtr<Worker>]>,
}

impl Workshop {
    /// One slot per worker, every worker initially idle
    pub(crate) fn new(workers: &[Worker]) -> Self {
        let slots = workers
            .iter()
            .map(|worker| AtomicPtr::new(worker as *const Worker as *mut Worker))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Try to take exclusive hold of a worker
    ///
    /// Returns None if some other thread currently holds it.
    pub(crate) fn claim(&self, index: usize) -> Option<Claim<'_>> {
        let slot = &self.slots[index];
        let worker = slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if worker.is_null() {
            None
        } else {
            Some(Claim { slot, worker })
        }
    }
}

/// Exclusive hold on one worker; releases on drop
pub(crate) struct Claim<'a> {
    slot: &'a AtomicPtr<Worker>,
    worker: *mut Worker,
}

impl Claim<'_> {
    pub(crate) fn worker(&self) -> &Worker {
        // SAFETY: slots point into the dispatcher's worker array, which
        // outlives every claim; threads are joined before it drops.
        unsafe { &*self.worker }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.slot.store(self.worker, Ordering::Release);
    }
}
