//! Selkie Core
//!
//! Core types, errors, and primitives for the Selkie dispatch engine.
//!
//! # Overview
//!
//! Selkie is an in-process event service: a fixed pool of OS threads
//! multiplexing user-submitted work across serial strands. This crate holds
//! the pieces that are independent of the engine itself:
//!
//! - Typed errors and explicit limit constants
//! - Validated engine configuration
//! - Telemetry bootstrap (tracing subscriber)
//! - The notify counter and the generic object pool the engine is built on
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `STRAND_COUNT_MAX`)
//! - Assertions on preconditions

pub mod config;
pub mod constants;
pub mod counter;
pub mod error;
pub mod pool;
pub mod telemetry;

pub use config::DispatcherConfig;
pub use constants::*;
pub use counter::NotifyCounter;
pub use error::{Error, Result};
pub use pool::ObjectPool;
pub use telemetry::{init_telemetry, TelemetryConfig};
