//! Generic object pool
//!
//! TigerStyle: Bounded allocation churn. Hot-path objects are recycled, not
//! reallocated. The freelist is a lock-free queue, so any number of threads
//! may recycle concurrently while any thread allocates.

use crossbeam_queue::SegQueue;

/// A recycling pool of boxed `T`
///
/// `get` pops a recycled box or constructs a fresh one with the make
/// function; `recycle` pushes a box back. The pool never shrinks: its
/// steady-state footprint is the high-water mark of live objects.
pub struct ObjectPool<T> {
    free: SegQueue<Box<T>>,
    make: fn() -> T,
}

impl<T> ObjectPool<T> {
    /// Create a pool that constructs fresh objects with `make`
    pub fn new(make: fn() -> T) -> Self {
        Self {
            free: SegQueue::new(),
            make,
        }
    }

    /// Take a recycled object, or construct a fresh one
    pub fn get(&self) -> Box<T> {
        self.free.pop().unwrap_or_else(|| Box::new((self.make)()))
    }

    /// Return an object to the pool
    pub fn recycle(&self, value: Box<T>) {
        self.free.push(value);
    }

    /// Number of idle objects currently held
    pub fn idle_count(&self) -> usize {
        self.free.len()
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("idle_count", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_constructs_when_empty() {
        let pool: ObjectPool<u64> = ObjectPool::new(|| 7);
        assert_eq!(*pool.get(), 7);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_recycle_reuses_allocation() {
        let pool: ObjectPool<u64> = ObjectPool::new(|| 0);

        let first = pool.get();
        let addr = &*first as *const u64;
        pool.recycle(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.get();
        assert_eq!(&*second as *const u64, addr);
    }

    #[test]
    fn test_recycle_from_other_thread() {
        let pool: std::sync::Arc<ObjectPool<u64>> = std::sync::Arc::new(ObjectPool::new(|| 0));

        let value = pool.get();
        let remote = std::sync::Arc::clone(&pool);
        std::thread::spawn(move || remote.recycle(value))
            .join()
            .unwrap();

        assert_eq!(pool.idle_count(), 1);
    }
}
