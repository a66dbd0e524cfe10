//! Selkie Runtime
//!
//! Strand-serializing event dispatch engine: the kernel beneath an actor
//! runtime.
//!
//! # Overview
//!
//! A [`Dispatcher`] owns a fixed pool of OS threads and a fixed array of
//! *strands*. Work (plain callbacks, user events, stackful coroutines)
//! is submitted to a strand; events on one strand run serially in
//! submission order, while strands make progress concurrently across the
//! thread pool. Each strand has a statically bound *prior* thread that is
//! woken on submission; idle threads opportunistically help drain the
//! strands of busy peers without ever breaking serialization.
//!
//! ```no_run
//! use selkie_runtime::{Dispatcher, DispatcherConfig};
//! use std::sync::Arc;
//!
//! let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::with_threads(4)));
//!
//! dispatcher.post(|ctx| {
//!     println!("running on thread {}", ctx.thread_index());
//! });
//! dispatcher.spawn(|coro| {
//!     coro.yield_now(); // resumed as a fresh work item
//! });
//!
//! let runner = {
//!     let dispatcher = Arc::clone(&dispatcher);
//!     std::thread::spawn(move || dispatcher.run())
//! };
//! dispatcher.stop();
//! runner.join().unwrap().unwrap();
//! ```
//!
//! # TigerStyle
//! - One thread drains a strand at a time (enforced, not assumed)
//! - Lossless wakeups via counted notification
//! - A fault takes down one thread, never the engine

mod context;
mod coro;
mod dispatcher;
mod event;
mod events;
mod fault;
mod registry;
mod worker;
mod workshop;

pub use context::ThreadContext;
pub use coro::CoroContext;
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use event::{Control, Envelope, Event, PoolMake, Pooled};
pub use events::{PostEvent, SpawnEvent};
pub use fault::{pcall, FaultInfo};

pub use selkie_core::{DispatcherConfig, Error, Result};
