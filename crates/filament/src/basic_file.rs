//! File objects bound to a [`ThreadPoolFileService`].

use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::mem::ManuallyDrop;
use std::path::Path;

use crate::clock::FileTimes;
use crate::error::FileResult;
use crate::flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms, OpenFlags};
use crate::handle::FileHandle;
use crate::native::{RawHandle, SeekOrigin};
use crate::service::{FileImpl, ThreadPoolFileService};

/// A file with synchronous and asynchronous operations.
///
/// A `BasicFile` is registered with one [`ThreadPoolFileService`] for its
/// whole life; dropping it closes the file and unregisters it.
///
/// # Example
///
/// ```no_run
/// use filament::{BasicFile, OpenFlags, ThreadPoolFileService};
/// use filament_core::IoContext;
///
/// let ctx = IoContext::new();
/// let service = ThreadPoolFileService::new(&ctx)?;
///
/// let mut file = BasicFile::new(&service);
/// file.open_with("log.txt", OpenFlags::ACCESS_WRITE | OpenFlags::OPEN_ALWAYS)?;
/// file.async_write_some(vec![b"started\n".to_vec()], |result, _| {
///     if let Err(err) = result {
///         eprintln!("write failed: {err}");
///     }
/// });
/// ctx.run();
/// # Ok::<(), filament::FileError>(())
/// ```
pub struct BasicFile {
    service: ThreadPoolFileService,
    imp: ManuallyDrop<FileImpl>,
}

static_assertions::assert_impl_all!(BasicFile: Send, Sync);

impl BasicFile {
    /// An unopened file bound to `service`.
    pub fn new(service: &ThreadPoolFileService) -> Self {
        Self {
            service: service.clone(),
            imp: ManuallyDrop::new(service.construct()),
        }
    }

    /// Open `path` in a new file object.
    pub fn open_new(
        service: &ThreadPoolFileService,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        perms: FilePerms,
        attrs: FileAttrs,
    ) -> FileResult<Self> {
        let file = Self::new(service);
        file.open(path, flags, perms, attrs)?;
        Ok(file)
    }

    /// The service this file is registered with.
    pub fn service(&self) -> &ThreadPoolFileService {
        &self.service
    }

    /// Open a file. Fails with `AlreadyOpen` if a file is open.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        perms: FilePerms,
        attrs: FileAttrs,
    ) -> FileResult<()> {
        self.service.open(&self.imp, path, flags, perms, attrs)
    }

    /// Open with default permissions and no attributes.
    pub fn open_with(&self, path: impl AsRef<Path>, flags: OpenFlags) -> FileResult<()> {
        self.open(path, flags, FilePerms::CREATE_DEFAULT, FileAttrs::NONE)
    }

    /// Take ownership of an open native handle.
    pub fn assign(&self, handle: FileHandle) -> FileResult<()> {
        self.service.assign(&self.imp, handle)
    }

    /// Whether a file is open.
    pub fn is_open(&self) -> bool {
        self.service.is_open(&self.imp)
    }

    /// The current handle, still owned by this object.
    pub fn handle(&self) -> FileHandle {
        self.service.handle(&self.imp)
    }

    /// The current native handle.
    pub fn native_handle(&self) -> RawHandle {
        self.handle().native_handle()
    }

    /// Close the file. Pending operations complete with `OperationAborted`.
    pub fn close(&self) -> FileResult<()> {
        self.service.close(&self.imp)
    }

    /// Give up the handle without closing it.
    pub fn release(&self) -> FileHandle {
        self.service.release(&self.imp)
    }

    /// Abort operations that have not started yet.
    pub fn cancel(&self) -> FileResult<()> {
        self.service.cancel(&self.imp)
    }

    /// Move the open file and its pending operations into a new object,
    /// leaving `self` unopened.
    pub fn take(&mut self) -> BasicFile {
        let imp = self.service.move_construct(&self.service, &mut self.imp);
        BasicFile {
            service: self.service.clone(),
            imp: ManuallyDrop::new(imp),
        }
    }

    /// Close this file and take over `other`'s open file, leaving `other`
    /// unopened. Afterwards `self` is bound to `other`'s service.
    pub fn move_from(&mut self, other: &mut BasicFile) {
        self.service
            .move_assign(&mut self.imp, &other.service, &mut other.imp);
        if !self.service.same_service(&other.service) {
            self.service = other.service.clone();
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Size of the file in bytes.
    pub fn size(&self) -> FileResult<u64> {
        self.service.size(&self.imp)
    }

    /// Truncate or extend the file.
    pub fn set_size(&self, new_size: u64) -> FileResult<()> {
        self.service.set_size(&self.imp, new_size)
    }

    /// Current file position.
    pub fn position(&self) -> FileResult<u64> {
        self.service.position(&self.imp)
    }

    /// Move the file position.
    pub fn seek(&self, origin: SeekOrigin, offset: i64) -> FileResult<u64> {
        self.service.seek(&self.imp, origin, offset)
    }

    /// Permission bits.
    pub fn permissions(&self) -> FileResult<FilePerms> {
        self.service.permissions(&self.imp)
    }

    /// Replace, add or remove permission bits.
    pub fn set_permissions(&self, perms: FilePerms, opts: FilePermOptions) -> FileResult<()> {
        self.service.set_permissions(&self.imp, perms, opts)
    }

    /// File attributes.
    pub fn attributes(&self) -> FileResult<FileAttrs> {
        self.service.attributes(&self.imp)
    }

    /// Replace, add or remove attributes.
    pub fn set_attributes(&self, attrs: FileAttrs, opts: FileAttrOptions) -> FileResult<()> {
        self.service.set_attributes(&self.imp, attrs, opts)
    }

    /// Creation, access and write times.
    pub fn times(&self) -> FileResult<FileTimes> {
        self.service.times(&self.imp)
    }

    /// Change the times that are `Some`.
    pub fn set_times(&self, times: &FileTimes) -> FileResult<()> {
        self.service.set_times(&self.imp, times)
    }

    // ========================================================================
    // I/O
    // ========================================================================

    /// Read at the current position.
    pub fn read_some(&self, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
        self.service.read_some(&self.imp, bufs)
    }

    /// Write at the current position.
    pub fn write_some(&self, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
        self.service.write_some(&self.imp, bufs)
    }

    /// Read at `offset`.
    pub fn read_some_at(&self, offset: u64, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
        self.service.read_some_at(&self.imp, offset, bufs)
    }

    /// Write at `offset`.
    pub fn write_some_at(&self, offset: u64, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
        self.service.write_some_at(&self.imp, offset, bufs)
    }

    /// Read at the current position on the service's worker pool.
    pub fn async_read_some<B, H>(&self, buffers: Vec<B>, handler: H)
    where
        B: AsMut<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.service.async_read_some(&self.imp, buffers, handler);
    }

    /// Write at the current position on the service's worker pool.
    pub fn async_write_some<B, H>(&self, buffers: Vec<B>, handler: H)
    where
        B: AsRef<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.service.async_write_some(&self.imp, buffers, handler);
    }

    /// Read at `offset` on the service's worker pool.
    pub fn async_read_some_at<B, H>(&self, offset: u64, buffers: Vec<B>, handler: H)
    where
        B: AsMut<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.service
            .async_read_some_at(&self.imp, offset, buffers, handler);
    }

    /// Write at `offset` on the service's worker pool.
    pub fn async_write_some_at<B, H>(&self, offset: u64, buffers: Vec<B>, handler: H)
    where
        B: AsRef<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.service
            .async_write_some_at(&self.imp, offset, buffers, handler);
    }
}

impl Drop for BasicFile {
    fn drop(&mut self) {
        // SAFETY: `imp` is never used again after this point.
        let imp = unsafe { ManuallyDrop::take(&mut self.imp) };
        self.service.destroy(imp);
    }
}

impl fmt::Debug for BasicFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicFile")
            .field("id", &self.imp.id())
            .field("handle", &self.handle())
            .finish()
    }
}
