//! Native file primitives.
//!
//! Every supported platform provides the same function table over a
//! [`RawHandle`]: open/close/duplicate, the standard streams, size and
//! position, permissions, attributes, times, and vectored plus positional
//! reads and writes. Higher layers never branch on the platform; they call
//! into this module.
//!
//! The functions are thin: one system call (two for read-modify-write
//! metadata updates), error translation, and `EINTR` retries where the OS
//! needs them. They never take ownership of a handle except for `close`.

#[cfg_attr(unix, path = "posix.rs")]
#[cfg_attr(windows, path = "windows.rs")]
mod imp;

#[cfg(not(any(unix, windows)))]
compile_error!("filament supports only unix and windows targets");

pub use imp::*;

/// Reference point for [`seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekOrigin {
    /// Offset is relative to the start of the file.
    FromBegin,
    /// Offset is relative to the current position.
    FromCurrent,
    /// Offset is relative to the end of the file.
    FromEnd,
}

/// Upper bound on the number of buffers passed to one vectored call.
pub const MAX_BUFFERS: usize = 64;

/// Whether any of the first [`MAX_BUFFERS`] buffers can hold or carry data.
fn has_data<B: std::ops::Deref<Target = [u8]>>(bufs: &[B]) -> bool {
    bufs.iter().take(MAX_BUFFERS).any(|buf| !buf.is_empty())
}
