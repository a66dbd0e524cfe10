//! Per-thread event pool registry
//!
//! Each OS thread keeps its own pool per `(dispatcher, event type, make)`
//! triple, so allocation never contends across threads. Recycling may
//! happen from any dispatch thread through the envelope's pool handle and
//! goes through the pool's lock-free freelist.
//!
//! Every pool created here is also linked into its dispatcher's registry so
//! teardown can account for it.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatcher::Inner;
use crate::event::{ErasedEventPool, Event, EventPool, PoolMake};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    uid: u32,
    event_type: TypeId,
    make: usize,
}

thread_local! {
    static EVENT_POOLS: RefCell<HashMap<PoolKey, Arc<dyn ErasedEventPool>>> =
        RefCell::new(HashMap::new());
}

/// This thread's pool for events of type `E` on the given dispatcher
pub(crate) fn pool_for<E: Event>(inner: &Inner, make: PoolMake<E>) -> Arc<EventPool<E>> {
    let key = PoolKey {
        uid: inner.uid(),
        event_type: TypeId::of::<E>(),
        make: make.key(),
    };

    EVENT_POOLS.with(|cell| {
        let mut pools = cell.borrow_mut();
        if let Some(existing) = pools.get(&key) {
            let existing = Arc::clone(existing) as Arc<dyn Any + Send + Sync>;
            match existing.downcast::<EventPool<E>>() {
                Ok(pool) => pool,
                // The key carries the TypeId, so the stored pool is always
                // the right one.
                Err(_) => unreachable!("pool registry key and pool type disagree"),
            }
        } else {
            let pool = Arc::new(EventPool::new(make.make_fn()));
            pools.insert(key, Arc::clone(&pool) as Arc<dyn ErasedEventPool>);
            inner.register_pool(Arc::clone(&pool) as Arc<dyn ErasedEventPool>);
            pool
        }
    })
}
