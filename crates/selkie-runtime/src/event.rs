//! Event model
//!
//! TigerStyle: Explicit ownership on the hot path. Every event dispatch
//! states what happens to the event afterwards.
//!
//! An event is the unit of work the engine dispatches. Handlers consume the
//! boxed event and return a [`Control`] describing its disposition, which is
//! how recycling and coroutine resumption stay allocation-free.

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use selkie_core::pool::ObjectPool;

use crate::context::ThreadContext;

/// A unit of work dispatched on a strand
///
/// Handlers run to completion on the thread that currently holds the
/// strand's worker; events on the same strand never run concurrently.
pub trait Event: Any + Send {
    /// Handle the event under the dispatching thread's context
    fn handle(self: Box<Self>, ctx: &mut ThreadContext) -> Control;
}

/// What the engine should do with an event after its handler ran
pub enum Control {
    /// Hand the event back for recycling into its pool (the common case)
    Release(Box<dyn Event>),
    /// Run the event again on the same strand, keeping its pool binding
    ///
    /// Used by coroutine events: every resume is dispatched as its own work
    /// item.
    Again(Box<dyn Event>),
    /// The handler took ownership of the event
    Detach,
}

/// Factory for pool-constructed events
///
/// The make function doubles as the pool identity: two `PoolMake`s with the
/// same function share a pool on any given thread.
pub struct PoolMake<E> {
    make: fn() -> E,
}

impl<E> PoolMake<E> {
    pub fn new(make: fn() -> E) -> Self {
        Self { make }
    }

    pub(crate) fn make_fn(&self) -> fn() -> E {
        self.make
    }

    pub(crate) fn key(&self) -> usize {
        self.make as usize
    }
}

impl<E> Clone for PoolMake<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for PoolMake<E> {}

impl<E: Default> Default for PoolMake<E> {
    fn default() -> Self {
        Self { make: E::default }
    }
}

/// Type-erased recycling surface of an event pool
///
/// Workers hold this through the envelope so they can return an event to
/// its pool without knowing the concrete type.
pub(crate) trait ErasedEventPool: Any + Send + Sync {
    fn recycle_boxed(&self, event: Box<dyn Event>);
}

/// A recycling pool for one event type
pub(crate) struct EventPool<E: Event> {
    inner: ObjectPool<E>,
}

impl<E: Event> EventPool<E> {
    pub(crate) fn new(make: fn() -> E) -> Self {
        Self {
            inner: ObjectPool::new(make),
        }
    }

    pub(crate) fn get(&self) -> Box<E> {
        self.inner.get()
    }
}

impl<E: Event> ErasedEventPool for EventPool<E> {
    fn recycle_boxed(&self, event: Box<dyn Event>) {
        let event: Box<dyn Any> = event;
        match event.downcast::<E>() {
            Ok(event) => self.inner.recycle(event),
            // Pool keys include the event's TypeId, so a mismatch here is a
            // bookkeeping bug, not a user error.
            Err(_) => debug_assert!(false, "event recycled into a pool of another type"),
        }
    }
}

/// Queue unit: a boxed event plus its owning pool, if any
pub struct Envelope {
    pub(crate) event: Box<dyn Event>,
    pub(crate) pool: Option<Arc<dyn ErasedEventPool>>,
}

impl Envelope {
    /// Wrap an event that was not drawn from a pool
    ///
    /// The event is dropped instead of recycled once handled.
    pub fn new(event: Box<dyn Event>) -> Self {
        Self { event, pool: None }
    }
}

impl<E: Event> From<Box<E>> for Envelope {
    fn from(event: Box<E>) -> Self {
        Self::new(event)
    }
}

impl<E: Event> From<Pooled<E>> for Envelope {
    fn from(pooled: Pooled<E>) -> Self {
        Self {
            event: pooled.event,
            pool: Some(pooled.pool),
        }
    }
}

/// A pool-allocated event, still typed so callers can configure it
///
/// Produced by `make_event`; submit it to erase the type and keep the pool
/// binding for recycling.
pub struct Pooled<E: Event> {
    event: Box<E>,
    pool: Arc<dyn ErasedEventPool>,
}

impl<E: Event> Pooled<E> {
    pub(crate) fn new(event: Box<E>, pool: Arc<dyn ErasedEventPool>) -> Self {
        Self { event, pool }
    }
}

impl<E: Event> Deref for Pooled<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.event
    }
}

impl<E: Event> DerefMut for Pooled<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.event
    }
}
