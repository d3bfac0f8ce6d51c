//! Error types for the Filament core runtime.

use std::fmt;
use std::io;

/// Thread pool specific errors.
#[derive(Debug)]
pub enum ThreadPoolError {
    /// The pool has been shut down and no longer accepts tasks.
    ShutDown,
    /// The task queue is at capacity.
    QueueFull,
    /// A worker thread could not be spawned.
    Spawn(io::Error),
    /// The configuration requested zero worker threads.
    NoThreads,
}

impl fmt::Display for ThreadPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "Thread pool has been shut down"),
            Self::QueueFull => write!(f, "Thread pool task queue is full"),
            Self::Spawn(err) => write!(f, "Failed to spawn worker thread: {err}"),
            Self::NoThreads => write!(f, "Thread pool requires at least one worker thread"),
        }
    }
}

impl std::error::Error for ThreadPoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// A specialized Result type for thread pool operations.
pub type Result<T> = std::result::Result<T, ThreadPoolError>;
