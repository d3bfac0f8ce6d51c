//! `tracing` targets, span names and helpers shared by both crates.
//!
//! Worker pool and context events are logged under `filament_core::*`;
//! the file layer logs under `filament::service` and `filament::native`.
//! Nothing is printed unless the application installs a subscriber:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("filament=debug,filament_core=trace")
//!     .init();
//! ```
//!
//! Cleanup paths (closing on drop, shutdown) never return errors; they
//! report them at `warn` level instead.

/// Log targets, for `EnvFilter` directives.
pub mod targets {
    /// Core runtime target.
    pub const CORE: &str = "filament_core";
    /// Worker pool target.
    pub const POOL: &str = "filament_core::pool";
    /// I/O context target.
    pub const CONTEXT: &str = "filament_core::context";
    /// Cancellation target.
    pub const CANCELLATION: &str = "filament_core::cancellation";
    /// File service target.
    pub const SERVICE: &str = "filament::service";
    /// Native file primitive target.
    pub const NATIVE: &str = "filament::native";
}

/// Keeps an `info` span under `filament::perf` entered until dropped, so a
/// timing subscriber can measure the enclosed work.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enter a span for `name`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "filament::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// `trace!` under the `filament_core` target.
#[macro_export]
macro_rules! filament_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "filament_core", $($arg)*)
    };
}

/// `debug!` under the `filament_core` target.
#[macro_export]
macro_rules! filament_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "filament_core", $($arg)*)
    };
}

/// `warn!` under the `filament_core` target.
#[macro_export]
macro_rules! filament_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "filament_core", $($arg)*)
    };
}

/// `error!` under the `filament_core` target.
#[macro_export]
macro_rules! filament_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "filament_core", $($arg)*)
    };
}
