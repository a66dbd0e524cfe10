//! Built-in events
//!
//! The two event shapes the engine submits on behalf of callers: a plain
//! callback and a stackful coroutine. Both are pool-recycled; a recycled
//! instance is re-armed with `set_handler` before the next dispatch.

use selkie_core::constants::CORO_STACK_SIZE_BYTES_DEFAULT;

use crate::context::ThreadContext;
use crate::coro::{CoroContext, Coroutine, Resume};
use crate::event::{Control, Event};

/// One-shot callback event
pub struct PostEvent {
    handler: Option<Box<dyn FnOnce(&mut ThreadContext) + Send>>,
}

impl Default for PostEvent {
    fn default() -> Self {
        Self { handler: None }
    }
}

impl PostEvent {
    pub fn set_handler(&mut self, handler: impl FnOnce(&mut ThreadContext) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }
}

impl Event for PostEvent {
    fn handle(mut self: Box<Self>, ctx: &mut ThreadContext) -> Control {
        debug_assert!(self.handler.is_some(), "post event dispatched unarmed");
        if let Some(handler) = self.handler.take() {
            handler(ctx);
        }
        Control::Release(self)
    }
}

/// Coroutine event
///
/// The first dispatch allocates the stack and enters the closure; each
/// yield re-enqueues the event on its strand, so every resume is dispatched
/// as its own work item. Completion drops the stack and releases the event
/// for recycling.
pub struct SpawnEvent {
    handler: Option<Box<dyn FnOnce(&mut CoroContext) + Send>>,
    stack_size_bytes: usize,
    coroutine: Option<Coroutine>,
}

impl Default for SpawnEvent {
    fn default() -> Self {
        Self {
            handler: None,
            stack_size_bytes: CORO_STACK_SIZE_BYTES_DEFAULT,
            coroutine: None,
        }
    }
}

impl SpawnEvent {
    pub fn set_handler(&mut self, handler: impl FnOnce(&mut CoroContext) + Send + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Request a specific stack size; clamped at allocation time
    pub fn set_stack_size(&mut self, size_bytes: usize) {
        self.stack_size_bytes = size_bytes;
    }
}

impl Event for SpawnEvent {
    fn handle(mut self: Box<Self>, ctx: &mut ThreadContext) -> Control {
        if self.coroutine.is_none() {
            let Some(handler) = self.handler.take() else {
                debug_assert!(false, "spawn event dispatched unarmed");
                return Control::Release(self);
            };
            let coroutine = match Coroutine::new(handler, self.stack_size_bytes) {
                Ok(coroutine) => coroutine,
                // Stack memory is the one resource this event cannot run
                // without, and there is no caller left to hand the error to.
                Err(err) => panic!("coroutine stack allocation failed: {err}"),
            };
            self.coroutine = Some(coroutine);
        }

        let host = ctx.host_context();
        let resume = match self.coroutine.as_mut() {
            Some(coroutine) => coroutine.resume(host),
            None => return Control::Release(self),
        };

        match resume {
            Resume::Yielded => Control::Again(self),
            Resume::Complete => {
                // Drop the stack now so the pooled event is lightweight.
                self.coroutine = None;
                Control::Release(self)
            }
        }
    }
}
