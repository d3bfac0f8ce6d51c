//! Core runtime for Filament.
//!
//! This crate provides the pieces the file layer is built on:
//!
//! - **I/O Context**: A handler queue that completion callbacks are delivered to
//! - **Thread Pool**: A fixed set of named worker threads for blocking calls
//! - **Cancellation**: Generation-counted sources and lock-free tokens
//! - **Logging**: `tracing` targets, macros and timing spans
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use filament_core::{CancellationSource, IoContext, ThreadPool};
//!
//! let ctx = IoContext::new();
//! let pool = ThreadPool::new().unwrap();
//! let source = CancellationSource::new();
//! let done = Arc::new(AtomicBool::new(false));
//!
//! // Blocking work runs on the pool, the completion runs on `ctx`.
//! let work = ctx.work_guard();
//! let token = source.token();
//! let remote = ctx.clone();
//! let flag = done.clone();
//! pool.execute(move || {
//!     let aborted = token.is_cancelled();
//!     remote.post(move || flag.store(!aborted, Ordering::SeqCst));
//!     drop(work);
//! }).unwrap();
//!
//! ctx.run();
//! assert!(done.load(Ordering::SeqCst));
//! ```

pub mod cancellation;
mod error;
pub mod io_context;
pub mod logging;
pub mod threadpool;

pub use cancellation::{CancellationSource, CancellationToken};
pub use error::{Result, ThreadPoolError};
pub use io_context::{IoContext, WorkGuard};
pub use logging::PerfSpan;
pub use threadpool::{ThreadPool, ThreadPoolBuilder, ThreadPoolConfig};
