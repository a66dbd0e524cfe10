//! Coroutine stacks
//!
//! Stacks are mmap'd with a `PROT_NONE` guard page at the low end, so a
//! runaway coroutine faults instead of silently corrupting neighboring
//! memory.

use std::io;
use std::ptr;

use selkie_core::constants::{CORO_STACK_SIZE_BYTES_MAX, CORO_STACK_SIZE_BYTES_MIN};
use selkie_core::{Error, Result};

/// An owned, guard-paged coroutine stack
pub(crate) struct Stack {
    base: *mut u8,
    total_bytes: usize,
}

// SAFETY: the mapping is plain anonymous memory; ownership moves with the
// struct and nothing aliases it.
unsafe impl Send for Stack {}

impl Stack {
    /// Map a stack of roughly `requested_bytes` usable bytes
    ///
    /// The request is clamped into the configured window and rounded up to
    /// page granularity; one extra page below the stack stays `PROT_NONE`.
    pub(crate) fn allocate(requested_bytes: usize) -> Result<Self> {
        let page = page_size();
        let usable = requested_bytes
            .clamp(CORO_STACK_SIZE_BYTES_MIN, CORO_STACK_SIZE_BYTES_MAX)
            .next_multiple_of(page);
        let total_bytes = usable + page;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::internal(format!(
                "mmap of {} byte coroutine stack failed: {}",
                total_bytes,
                io::Error::last_os_error()
            )));
        }

        // Guard page at the low end; the stack grows down toward it.
        let rc = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base, total_bytes);
            }
            return Err(Error::internal(format!(
                "mprotect of coroutine guard page failed: {}",
                err
            )));
        }

        Ok(Self {
            base: base as *mut u8,
            total_bytes,
        })
    }

    /// High end of the usable stack region
    pub(crate) fn top(&self) -> *mut u8 {
        // SAFETY: base + total_bytes is one-past-the-end of the mapping.
        unsafe { self.base.add(self.total_bytes) }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: base/total_bytes describe exactly the mapping created in
        // `allocate`.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total_bytes);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    debug_assert!(size > 0);
    size as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let stack = Stack::allocate(CORO_STACK_SIZE_BYTES_MIN).unwrap();
        assert!(!stack.top().is_null());
        assert_eq!(stack.top() as usize % page_size(), 0);
    }

    #[test]
    fn test_stack_is_writable_below_top() {
        let stack = Stack::allocate(CORO_STACK_SIZE_BYTES_MIN).unwrap();
        // SAFETY: one word below the top is inside the RW region.
        unsafe {
            let slot = stack.top().sub(8) as *mut u64;
            slot.write_volatile(0xDEAD_BEEF);
            assert_eq!(slot.read_volatile(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn test_tiny_request_is_clamped_up() {
        let stack = Stack::allocate(1).unwrap();
        let span = stack.top() as usize - stack.base as usize;
        assert!(span >= CORO_STACK_SIZE_BYTES_MIN);
    }
}
