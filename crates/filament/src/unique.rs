//! Owning file handles.

use std::fmt;
use std::ops::Deref;
use std::path::Path;

use crate::error::FileResult;
use crate::flags::{FileAttrs, FilePerms, OpenFlags};
use crate::handle::FileHandle;
use crate::native::{self, RawHandle};
use crate::open_args::OpenArgs;

/// A file handle that closes itself when dropped.
///
/// `UniqueFileHandle` is move-only. It dereferences to [`FileHandle`], so
/// every metadata and I/O operation is available on it directly.
///
/// # Example
///
/// ```no_run
/// use filament::{FileAttrs, FilePerms, OpenFlags, UniqueFileHandle};
///
/// let file = UniqueFileHandle::open(
///     "notes.txt",
///     OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS,
///     FilePerms::CREATE_DEFAULT,
///     FileAttrs::NONE,
/// )?;
/// file.write_all(b"hello world!")?;
/// # Ok::<(), filament::FileError>(())
/// ```
#[derive(Default)]
pub struct UniqueFileHandle {
    handle: FileHandle,
}

static_assertions::assert_impl_all!(UniqueFileHandle: Send, Sync);
static_assertions::assert_not_impl_any!(UniqueFileHandle: Clone, Copy);

impl UniqueFileHandle {
    /// An owner of nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file.
    ///
    /// Fails with `InvalidArgument`, before touching the filesystem, when the
    /// flags name more than one creation disposition or when `perms`/`attrs`
    /// carry bits this platform rejects.
    pub fn open(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        perms: FilePerms,
        attrs: FileAttrs,
    ) -> FileResult<Self> {
        Self::open_with_args(path, &OpenArgs::new(flags, perms, attrs))
    }

    /// Open a file with arguments translated ahead of time.
    pub fn open_with_args(path: impl AsRef<Path>, args: &OpenArgs) -> FileResult<Self> {
        let raw = native::open(path.as_ref(), args)?;
        Ok(Self::from_raw(raw))
    }

    /// Take ownership of a native handle.
    pub fn from_raw(raw: RawHandle) -> Self {
        Self {
            handle: FileHandle::from_raw(raw),
        }
    }

    /// The owned handle, still owned by `self`.
    pub fn get(&self) -> FileHandle {
        self.handle
    }

    /// Give up ownership without closing.
    pub fn release(&mut self) -> FileHandle {
        std::mem::take(&mut self.handle)
    }

    /// Close the current handle, if any, then take ownership of `handle`.
    ///
    /// If closing fails, `handle` is not adopted and the error is returned.
    pub fn reset(&mut self, handle: FileHandle) -> FileResult<()> {
        self.handle.close()?;
        self.handle = handle;
        Ok(())
    }

    /// Close the handle now, reporting any error.
    pub fn close(&mut self) -> FileResult<()> {
        self.handle.close()
    }
}

impl Deref for UniqueFileHandle {
    type Target = FileHandle;

    fn deref(&self) -> &FileHandle {
        &self.handle
    }
}

impl From<FileHandle> for UniqueFileHandle {
    fn from(handle: FileHandle) -> Self {
        Self { handle }
    }
}

impl Drop for UniqueFileHandle {
    fn drop(&mut self) {
        if let Err(err) = self.handle.close() {
            tracing::warn!(target: "filament::native", error = %err, "failed to close file handle on drop");
        }
    }
}

impl fmt::Debug for UniqueFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UniqueFileHandle").field(&self.handle).finish()
    }
}

/// Create a new owning handle that refers to the same open file.
///
/// Whether the two handles share a file position is up to the OS; on POSIX
/// and Windows they do.
pub fn duplicate(handle: FileHandle) -> FileResult<UniqueFileHandle> {
    if !handle.is_open() {
        return Err(crate::FileError::bad_descriptor());
    }
    let raw = native::duplicate(handle.native_handle())?;
    tracing::debug!(target: "filament::native", ?handle, duplicate = raw, "duplicated handle");
    Ok(UniqueFileHandle::from_raw(raw))
}
