//! Non-owning native file handles.
//!
//! A [`FileHandle`] is a plain value around a native descriptor. Copying it
//! copies the number, not the open file: closing through one copy leaves the
//! others holding a stale value. Use
//! [`UniqueFileHandle`](crate::UniqueFileHandle) for ownership.

use std::fmt;
use std::io::{IoSlice, IoSliceMut};

use crate::clock::FileTimes;
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms};
use crate::native::{self, RawHandle, SeekOrigin};

/// A copyable, non-owning wrapper around a native file handle.
///
/// Every operation on a handle that is not open fails with
/// `BadDescriptor` without reaching the OS.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle {
    raw: RawHandle,
}

static_assertions::assert_impl_all!(FileHandle: Send, Sync, Copy);

impl Default for FileHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl FileHandle {
    /// A handle that refers to no file.
    pub const fn invalid() -> Self {
        Self {
            raw: native::INVALID_HANDLE,
        }
    }

    /// Wrap a native handle without taking ownership.
    pub const fn from_raw(raw: RawHandle) -> Self {
        Self { raw }
    }

    /// The wrapped native handle.
    pub const fn native_handle(&self) -> RawHandle {
        self.raw
    }

    /// Whether the handle refers to a file.
    pub const fn is_open(&self) -> bool {
        self.raw != native::INVALID_HANDLE
    }

    fn checked(&self) -> FileResult<RawHandle> {
        if self.is_open() {
            Ok(self.raw)
        } else {
            Err(FileError::bad_descriptor())
        }
    }

    /// Close the native handle and mark this value as not open.
    ///
    /// Closing a handle that is not open succeeds and does nothing. The
    /// value is cleared even when the OS reports an error.
    pub fn close(&mut self) -> FileResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, native::INVALID_HANDLE);
        native::close(raw)
    }

    /// Forget the native handle without closing it.
    pub fn clear(&mut self) {
        self.raw = native::INVALID_HANDLE;
    }

    // ========================================================================
    // Size and position
    // ========================================================================

    /// Size of the file in bytes.
    pub fn size(&self) -> FileResult<u64> {
        native::size(self.checked()?)
    }

    /// Truncate or extend the file to `new_size` bytes.
    pub fn set_size(&self, new_size: u64) -> FileResult<()> {
        native::set_size(self.checked()?, new_size)
    }

    /// Current file position.
    pub fn position(&self) -> FileResult<u64> {
        self.seek(SeekOrigin::FromCurrent, 0)
    }

    /// Move the file position and return the new absolute position.
    pub fn seek(&self, origin: SeekOrigin, offset: i64) -> FileResult<u64> {
        native::seek(self.checked()?, origin, offset)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Permission bits.
    pub fn permissions(&self) -> FileResult<FilePerms> {
        native::permissions(self.checked()?)
    }

    /// Replace, add or remove permission bits.
    pub fn set_permissions(&self, perms: FilePerms, opts: FilePermOptions) -> FileResult<()> {
        native::set_permissions(self.checked()?, perms, opts)
    }

    /// File attributes the host records.
    pub fn attributes(&self) -> FileResult<FileAttrs> {
        native::attributes(self.checked()?)
    }

    /// Replace, add or remove attributes.
    pub fn set_attributes(&self, attrs: FileAttrs, opts: FileAttrOptions) -> FileResult<()> {
        native::set_attributes(self.checked()?, attrs, opts)
    }

    /// Creation, access and write times.
    pub fn times(&self) -> FileResult<FileTimes> {
        native::times(self.checked()?)
    }

    /// Change the times that are `Some`.
    pub fn set_times(&self, times: &FileTimes) -> FileResult<()> {
        native::set_times(self.checked()?, times)
    }

    // ========================================================================
    // Data transfer
    // ========================================================================

    /// Read into `bufs` at the current position.
    ///
    /// Returns the number of bytes read, which may be less than the space
    /// available. Fails with `Eof` when the position is at the end of the
    /// file and at least one buffer is non-empty.
    pub fn read_some(&self, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
        native::readv(self.checked()?, bufs)
    }

    /// Write from `bufs` at the current position. May write less than all.
    pub fn write_some(&self, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
        native::writev(self.checked()?, bufs)
    }

    /// Read into `bufs` at `offset`.
    pub fn read_some_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
        native::preadv(self.checked()?, bufs, offset)
    }

    /// Write from `bufs` at `offset`.
    pub fn write_some_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
        native::pwritev(self.checked()?, bufs, offset)
    }

    /// Fill `buf` completely from the current position.
    ///
    /// Fails with `Eof` if the file ends first.
    pub fn read_exact(&self, mut buf: &mut [u8]) -> FileResult<()> {
        while !buf.is_empty() {
            let n = self.read_some(&mut [IoSliceMut::new(buf)])?;
            let rest = buf;
            buf = &mut rest[n..];
        }
        Ok(())
    }

    /// Write all of `buf` at the current position.
    pub fn write_all(&self, mut buf: &[u8]) -> FileResult<()> {
        while !buf.is_empty() {
            let n = self.write_some(&[IoSlice::new(buf)])?;
            if n == 0 {
                return Err(FileError::from_kind(FileErrorKind::NoSpace));
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl From<RawHandle> for FileHandle {
    fn from(raw: RawHandle) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open() {
            write!(f, "FileHandle({})", self.raw)
        } else {
            write!(f, "FileHandle(closed)")
        }
    }
}

// ============================================================================
// Standard streams
// ============================================================================

/// The process's standard input. Not owned: do not close it.
pub fn stdin() -> FileResult<FileHandle> {
    native::stdin().map(FileHandle::from_raw)
}

/// The process's standard output. Not owned: do not close it.
pub fn stdout() -> FileResult<FileHandle> {
    native::stdout().map(FileHandle::from_raw)
}

/// The process's standard error. Not owned: do not close it.
pub fn stderr() -> FileResult<FileHandle> {
    native::stderr().map(FileHandle::from_raw)
}
