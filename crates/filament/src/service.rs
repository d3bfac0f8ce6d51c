//! Thread-pool backed asynchronous file service.
//!
//! [`ThreadPoolFileService`] turns blocking file system calls into
//! asynchronous operations. Each file object bound to the service owns a
//! [`FileImpl`]: the current [`FileHandle`] plus a cancellation source.
//! Asynchronous operations capture a cancellation token, a copy of the
//! handle and the caller's buffers, run the blocking call on a worker
//! thread, and deliver the result to the service's [`IoContext`].
//!
//! # Guarantees
//!
//! - Initiating an asynchronous operation never blocks and never calls the
//!   handler inline, not even from inside a running handler.
//! - Every handler is called exactly once, through the context, even when
//!   the operation is cancelled, the worker pool is gone, or the service is
//!   shut down before the operation started. Those cases report
//!   `OperationAborted`.
//! - `cancel()` aborts operations that have not started yet. A system call
//!   already in progress completes and reports its own result.
//! - The registry lock is held only to insert, remove or snapshot entries;
//!   never across a system call or a handler.
//!
//! # Ordering
//!
//! With one worker thread (the default) operations run in the order they
//! were issued. With more workers no ordering is promised.
//!
//! # Example
//!
//! ```no_run
//! use filament::{FileAttrs, FilePerms, OpenFlags, ThreadPoolFileService};
//! use filament_core::IoContext;
//!
//! let ctx = IoContext::new();
//! let service = ThreadPoolFileService::new(&ctx)?;
//!
//! let file = service.construct();
//! service.open(
//!     &file,
//!     "data.bin",
//!     OpenFlags::ACCESS_READ | OpenFlags::OPEN_EXISTING,
//!     FilePerms::CREATE_DEFAULT,
//!     FileAttrs::NONE,
//! )?;
//!
//! service.async_read_some(&file, vec![vec![0u8; 4096]], |result, buffers| {
//!     match result {
//!         Ok(n) => println!("read {n} bytes: {:?}", &buffers[0][..n]),
//!         Err(err) => println!("read failed: {err}"),
//!     }
//! });
//!
//! ctx.run();
//! service.destroy(file);
//! # Ok::<(), filament::FileError>(())
//! ```

use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use filament_core::{
    CancellationSource, CancellationToken, IoContext, PerfSpan, ThreadPool, ThreadPoolConfig,
    WorkGuard,
};
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::clock::FileTimes;
use crate::debug::RegistryDebug;
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::{FileAttrOptions, FileAttrs, FilePermOptions, FilePerms, OpenFlags};
use crate::handle::FileHandle;
use crate::native::{self, SeekOrigin};
use crate::open_args::OpenArgs;

slotmap::new_key_type! {
    /// Identifies a file implementation inside one service's registry.
    pub struct ImplId;
}

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Per-file state
// ============================================================================

struct ImplState {
    handle: Mutex<FileHandle>,
    cancel: CancellationSource,
}

impl ImplState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            handle: Mutex::new(FileHandle::invalid()),
            cancel: CancellationSource::new(),
        })
    }

    fn current(&self) -> FileHandle {
        *self.handle.lock()
    }

    /// Install `handle` if nothing is open. Gives the handle back otherwise.
    fn adopt(&self, handle: FileHandle) -> Result<(), FileHandle> {
        let mut slot = self.handle.lock();
        if slot.is_open() {
            return Err(handle);
        }
        *slot = handle;
        drop(slot);
        self.cancel.reset();
        Ok(())
    }

    /// Invalidate queued operations and take the handle out.
    fn take(&self) -> FileHandle {
        self.cancel.destroy();
        std::mem::take(&mut *self.handle.lock())
    }

    fn close(&self) -> FileResult<()> {
        self.take().close()
    }
}

/// The per-object state of a file bound to a [`ThreadPoolFileService`].
///
/// Created by [`ThreadPoolFileService::construct`] and handed back to
/// [`ThreadPoolFileService::destroy`]. Move-only.
pub struct FileImpl {
    id: ImplId,
    owner: u64,
    state: Arc<ImplState>,
}

static_assertions::assert_impl_all!(FileImpl: Send, Sync);
static_assertions::assert_not_impl_any!(FileImpl: Clone);

impl FileImpl {
    /// Registry key of this implementation.
    pub fn id(&self) -> ImplId {
        self.id
    }
}

impl fmt::Debug for FileImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileImpl")
            .field("id", &self.id)
            .field("handle", &self.state.current())
            .finish()
    }
}

/// A registry entry as seen by [`RegistryDebug`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegistryEntry {
    pub id: ImplId,
    pub handle: FileHandle,
    pub generation: u64,
    pub destroyed: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`ThreadPoolFileService`].
#[derive(Debug, Clone, Default)]
pub struct FileServiceConfig {
    /// Worker pool that runs the blocking calls.
    pub pool: ThreadPoolConfig,
}

impl FileServiceConfig {
    /// Configuration with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            pool: ThreadPoolConfig::with_threads(num_threads),
        }
    }
}

/// Builder for a [`ThreadPoolFileService`].
///
/// ```no_run
/// use filament::FileServiceBuilder;
/// use filament_core::IoContext;
///
/// let ctx = IoContext::new();
/// let service = FileServiceBuilder::new()
///     .threads(2)
///     .thread_name("disk")
///     .build(&ctx)?;
/// # Ok::<(), filament::FileError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileServiceBuilder {
    config: FileServiceConfig,
}

impl FileServiceBuilder {
    /// A builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of worker threads.
    pub fn threads(mut self, num_threads: usize) -> Self {
        self.config.pool.num_threads = num_threads;
        self
    }

    /// Prefix for worker thread names.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.pool.thread_name = name.into();
        self
    }

    /// Stack size of each worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.pool.stack_size = Some(size);
        self
    }

    /// Bound the number of queued operations. Operations issued while the
    /// queue is full complete with `OperationAborted`.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.pool.queue_capacity = Some(capacity);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &FileServiceConfig {
        &self.config
    }

    /// Start the service. Completions are delivered to `context`.
    pub fn build(self, context: &IoContext) -> FileResult<ThreadPoolFileService> {
        ThreadPoolFileService::with_config(context, self.config)
    }
}

/// Install a freshly opened handle. If another thread opened `imp` in the
/// meantime the new handle is closed and `AlreadyOpen` returned.
fn adopt_opened(imp: &FileImpl, handle: FileHandle, path: &Path) -> FileResult<()> {
    imp.state.adopt(handle).or_else(|mut lost| {
        if let Err(err) = lost.close() {
            tracing::warn!(
                target: "filament::service",
                error = %err,
                path = %path.display(),
                "close failed after losing open race"
            );
        }
        Err(FileError::from_kind(FileErrorKind::AlreadyOpen).with_path(path))
    })
}

// ============================================================================
// Service
// ============================================================================

struct ServiceInner {
    id: u64,
    context: IoContext,
    pool: ThreadPool,
    registry: Mutex<SlotMap<ImplId, Arc<ImplState>>>,
    shut_down: AtomicBool,
    config: FileServiceConfig,
}

impl ServiceInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let _perf = PerfSpan::new("file_service_shutdown");
        self.close_all("close failed during shutdown");

        // Queued operations now see destroyed tokens and abort.
        self.pool.shutdown();
    }

    /// Close every registered file. Errors are logged.
    fn close_all(&self, context: &'static str) {
        let live: Vec<Arc<ImplState>> = self.registry.lock().values().cloned().collect();
        tracing::debug!(
            target: "filament::service",
            service = self.id,
            live = live.len(),
            "closing registered files"
        );

        for state in live {
            if let Err(err) = state.close() {
                tracing::warn!(target: "filament::service", error = %err, "{context}");
            }
        }
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if self.shut_down.load(Ordering::Acquire) {
            // Files opened after an explicit shutdown.
            self.close_all("close failed while dropping service");
        } else {
            self.shutdown();
        }
    }
}

/// Asynchronous file operations on a fixed pool of worker threads.
///
/// Cloning is cheap and yields another reference to the same service. The
/// service shuts down when [`shutdown`](Self::shutdown) is called or the
/// last reference is dropped.
#[derive(Clone)]
pub struct ThreadPoolFileService {
    inner: Arc<ServiceInner>,
}

static_assertions::assert_impl_all!(ThreadPoolFileService: Send, Sync);

impl ThreadPoolFileService {
    /// Start a service with one worker thread.
    pub fn new(context: &IoContext) -> FileResult<Self> {
        Self::with_config(context, FileServiceConfig::default())
    }

    /// Start a service with a custom configuration.
    pub fn with_config(context: &IoContext, config: FileServiceConfig) -> FileResult<Self> {
        let pool = ThreadPool::with_config(config.pool.clone())?;
        let id = NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "filament::service",
            service = id,
            context = context.id(),
            threads = pool.num_threads(),
            "file service started"
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                id,
                context: context.clone(),
                pool,
                registry: Mutex::new(SlotMap::with_key()),
                shut_down: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// The context completions are delivered to.
    pub fn context(&self) -> &IoContext {
        &self.inner.context
    }

    /// The configuration the service was started with.
    pub fn config(&self) -> &FileServiceConfig {
        &self.inner.config
    }

    /// Whether both values refer to the same service.
    pub fn same_service(&self, other: &ThreadPoolFileService) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn owns(&self, imp: &FileImpl) -> bool {
        imp.owner == self.inner.id
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    /// Register a new, unopened implementation.
    pub fn construct(&self) -> FileImpl {
        let state = ImplState::new();
        let id = self.inner.registry.lock().insert(state.clone());
        tracing::trace!(target: "filament::service", ?id, "registered file");
        FileImpl {
            id,
            owner: self.inner.id,
            state,
        }
    }

    /// Register a new implementation that takes over `other`'s handle and
    /// cancellation source. `other` stays unopened and registered with
    /// `other_service`, which may differ from `self`.
    ///
    /// Operations queued through `other` stay attached to the moved state:
    /// cancelling the new implementation cancels them.
    pub fn move_construct(
        &self,
        other_service: &ThreadPoolFileService,
        other: &mut FileImpl,
    ) -> FileImpl {
        let fresh = ImplState::new();
        let moved = std::mem::replace(&mut other.state, fresh.clone());

        if other_service.owns(other) {
            if let Some(slot) = other_service.inner.registry.lock().get_mut(other.id) {
                *slot = fresh;
            }
        }
        let id = self.inner.registry.lock().insert(moved.clone());

        tracing::trace!(target: "filament::service", ?id, from = ?other.id, "moved file");
        FileImpl {
            id,
            owner: self.inner.id,
            state: moved,
        }
    }

    /// Close `imp`, then move `other`'s handle and cancellation source into
    /// it. `other` is left unopened.
    ///
    /// When `other_service` is a different service, `imp` moves into that
    /// service's registry: afterwards it must be used with `other_service`.
    pub fn move_assign(
        &self,
        imp: &mut FileImpl,
        other_service: &ThreadPoolFileService,
        other: &mut FileImpl,
    ) {
        if let Err(err) = imp.state.close() {
            tracing::warn!(target: "filament::service", error = %err, "close failed during move");
        }

        let fresh = ImplState::new();
        let moved = std::mem::replace(&mut other.state, fresh.clone());
        if other_service.owns(other) {
            if let Some(slot) = other_service.inner.registry.lock().get_mut(other.id) {
                *slot = fresh;
            }
        }

        if self.same_service(other_service) {
            if let Some(slot) = self.inner.registry.lock().get_mut(imp.id) {
                *slot = moved.clone();
            }
        } else {
            if self.owns(imp) {
                self.inner.registry.lock().remove(imp.id);
            }
            imp.id = other_service.inner.registry.lock().insert(moved.clone());
            imp.owner = other_service.inner.id;
        }
        imp.state = moved;

        tracing::trace!(
            target: "filament::service",
            id = ?imp.id,
            from = ?other.id,
            cross_service = !self.same_service(other_service),
            "move-assigned file"
        );
    }

    /// Close the handle, if any, and unregister the implementation.
    ///
    /// Close errors are logged and otherwise ignored.
    #[tracing::instrument(skip(self), target = "filament::service", level = "trace")]
    pub fn destroy(&self, imp: FileImpl) {
        if let Err(err) = imp.state.close() {
            tracing::warn!(target: "filament::service", error = %err, "close failed during destroy");
        }
        if self.owns(&imp) {
            self.inner.registry.lock().remove(imp.id);
        }
    }

    /// Close every open file, then stop and join the worker pool.
    ///
    /// Operations still queued complete with `OperationAborted`. Idempotent;
    /// also runs when the last reference to the service is dropped.
    /// Synchronous operations keep working afterwards, asynchronous ones
    /// abort. Files opened after the shutdown are closed when the last
    /// reference to the service is dropped.
    #[tracing::instrument(skip(self), target = "filament::service", level = "debug")]
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    // ========================================================================
    // Opening and closing
    // ========================================================================

    /// Open a file into `imp`.
    ///
    /// Fails with `AlreadyOpen` if `imp` holds a handle. On any failure
    /// `imp` stays closed.
    #[tracing::instrument(
        skip(self, path),
        fields(path = %path.as_ref().display()),
        target = "filament::service",
        level = "debug"
    )]
    pub fn open(
        &self,
        imp: &FileImpl,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        perms: FilePerms,
        attrs: FileAttrs,
    ) -> FileResult<()> {
        let path = path.as_ref();
        if imp.state.current().is_open() {
            return Err(FileError::from_kind(FileErrorKind::AlreadyOpen).with_path(path));
        }

        let raw = native::open(path, &OpenArgs::new(flags, perms, attrs))?;
        adopt_opened(imp, FileHandle::from_raw(raw), path)
    }

    /// Take ownership of an already-open native handle.
    ///
    /// Fails with `AlreadyOpen`, leaving `handle` with the caller, if `imp`
    /// holds a handle.
    pub fn assign(&self, imp: &FileImpl, handle: FileHandle) -> FileResult<()> {
        imp.state
            .adopt(handle)
            .map_err(|_| FileError::from_kind(FileErrorKind::AlreadyOpen))?;
        tracing::debug!(target: "filament::service", id = ?imp.id, ?handle, "assigned handle");
        Ok(())
    }

    /// Close the handle. Queued operations complete with
    /// `OperationAborted`. Closing an unopened implementation succeeds.
    pub fn close(&self, imp: &FileImpl) -> FileResult<()> {
        let result = imp.state.close();
        tracing::debug!(target: "filament::service", id = ?imp.id, ok = result.is_ok(), "closed file");
        result
    }

    /// Give up the handle without closing it. Queued operations complete
    /// with `OperationAborted`.
    pub fn release(&self, imp: &FileImpl) -> FileHandle {
        imp.state.take()
    }

    /// Whether `imp` holds a handle.
    pub fn is_open(&self, imp: &FileImpl) -> bool {
        imp.state.current().is_open()
    }

    /// The handle currently held by `imp`.
    pub fn handle(&self, imp: &FileImpl) -> FileHandle {
        imp.state.current()
    }

    /// Abort every operation on `imp` that has not started yet.
    ///
    /// Fails with `BadDescriptor` if `imp` holds no handle.
    pub fn cancel(&self, imp: &FileImpl) -> FileResult<()> {
        if !imp.state.current().is_open() {
            return Err(FileError::bad_descriptor());
        }
        imp.state.cancel.cancel();
        tracing::debug!(target: "filament::service", id = ?imp.id, "cancelled pending operations");
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Size of the file in bytes.
    pub fn size(&self, imp: &FileImpl) -> FileResult<u64> {
        imp.state.current().size()
    }

    /// Truncate or extend the file.
    pub fn set_size(&self, imp: &FileImpl, new_size: u64) -> FileResult<()> {
        imp.state.current().set_size(new_size)
    }

    /// Current file position.
    pub fn position(&self, imp: &FileImpl) -> FileResult<u64> {
        imp.state.current().position()
    }

    /// Move the file position.
    pub fn seek(&self, imp: &FileImpl, origin: SeekOrigin, offset: i64) -> FileResult<u64> {
        imp.state.current().seek(origin, offset)
    }

    /// Permission bits.
    pub fn permissions(&self, imp: &FileImpl) -> FileResult<FilePerms> {
        imp.state.current().permissions()
    }

    /// Replace, add or remove permission bits.
    pub fn set_permissions(
        &self,
        imp: &FileImpl,
        perms: FilePerms,
        opts: FilePermOptions,
    ) -> FileResult<()> {
        imp.state.current().set_permissions(perms, opts)
    }

    /// File attributes.
    pub fn attributes(&self, imp: &FileImpl) -> FileResult<FileAttrs> {
        imp.state.current().attributes()
    }

    /// Replace, add or remove attributes.
    pub fn set_attributes(
        &self,
        imp: &FileImpl,
        attrs: FileAttrs,
        opts: FileAttrOptions,
    ) -> FileResult<()> {
        imp.state.current().set_attributes(attrs, opts)
    }

    /// Creation, access and write times.
    pub fn times(&self, imp: &FileImpl) -> FileResult<FileTimes> {
        imp.state.current().times()
    }

    /// Change the times that are `Some`.
    pub fn set_times(&self, imp: &FileImpl, times: &FileTimes) -> FileResult<()> {
        imp.state.current().set_times(times)
    }

    // ========================================================================
    // Synchronous I/O
    // ========================================================================

    /// Read at the current position.
    pub fn read_some(&self, imp: &FileImpl, bufs: &mut [IoSliceMut<'_>]) -> FileResult<usize> {
        imp.state.current().read_some(bufs)
    }

    /// Write at the current position.
    pub fn write_some(&self, imp: &FileImpl, bufs: &[IoSlice<'_>]) -> FileResult<usize> {
        imp.state.current().write_some(bufs)
    }

    /// Read at `offset`.
    pub fn read_some_at(
        &self,
        imp: &FileImpl,
        offset: u64,
        bufs: &mut [IoSliceMut<'_>],
    ) -> FileResult<usize> {
        imp.state.current().read_some_at(offset, bufs)
    }

    /// Write at `offset`.
    pub fn write_some_at(
        &self,
        imp: &FileImpl,
        offset: u64,
        bufs: &[IoSlice<'_>],
    ) -> FileResult<usize> {
        imp.state.current().write_some_at(offset, bufs)
    }

    // ========================================================================
    // Asynchronous I/O
    // ========================================================================

    /// Read at the current position on a worker thread.
    ///
    /// `handler` receives the result and the buffers back.
    pub fn async_read_some<B, H>(&self, imp: &FileImpl, buffers: Vec<B>, handler: H)
    where
        B: AsMut<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.submit(imp, "read_some", buffers, handler, |handle, bufs| {
            handle.read_some(&mut io_slices_mut(bufs))
        });
    }

    /// Write at the current position on a worker thread.
    pub fn async_write_some<B, H>(&self, imp: &FileImpl, buffers: Vec<B>, handler: H)
    where
        B: AsRef<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.submit(imp, "write_some", buffers, handler, |handle, bufs| {
            handle.write_some(&io_slices(bufs))
        });
    }

    /// Read at `offset` on a worker thread.
    pub fn async_read_some_at<B, H>(&self, imp: &FileImpl, offset: u64, buffers: Vec<B>, handler: H)
    where
        B: AsMut<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.submit(imp, "read_some_at", buffers, handler, move |handle, bufs| {
            handle.read_some_at(offset, &mut io_slices_mut(bufs))
        });
    }

    /// Write at `offset` on a worker thread.
    pub fn async_write_some_at<B, H>(
        &self,
        imp: &FileImpl,
        offset: u64,
        buffers: Vec<B>,
        handler: H,
    ) where
        B: AsRef<[u8]> + Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
    {
        self.submit(imp, "write_some_at", buffers, handler, move |handle, bufs| {
            handle.write_some_at(offset, &io_slices(bufs))
        });
    }

    fn submit<B, H, F>(&self, imp: &FileImpl, name: &'static str, buffers: Vec<B>, handler: H, io: F)
    where
        B: Send + 'static,
        H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
        F: FnOnce(FileHandle, &mut [B]) -> FileResult<usize> + Send + 'static,
    {
        // Token before handle: a close in between aborts the operation.
        let token = imp.state.cancel.token();
        let op = PendingOp {
            name,
            context: self.inner.context.clone(),
            token,
            handle: imp.state.current(),
            buffers,
            handler: Some(handler),
            _work: self.inner.context.work_guard(),
        };

        if let Err(err) = self.inner.pool.execute(move || op.run(io)) {
            // The rejected operation was dropped and reported the abort.
            tracing::debug!(target: "filament::service", op = name, error = %err, "operation rejected");
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of registered implementations.
    pub fn live_implementations(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// A formatter for the registry contents.
    pub fn registry_debug(&self) -> RegistryDebug {
        RegistryDebug::new(self.inner.id, self.registry_snapshot())
    }

    fn registry_snapshot(&self) -> Vec<RegistryEntry> {
        let registry = self.inner.registry.lock();
        registry
            .iter()
            .map(|(id, state)| RegistryEntry {
                id,
                handle: state.current(),
                generation: state.cancel.generation(),
                destroyed: state.cancel.is_destroyed(),
            })
            .collect()
    }
}

impl fmt::Debug for ThreadPoolFileService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolFileService")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context.id())
            .field("pool", &self.inner.pool)
            .field("live", &self.live_implementations())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn io_slices_mut<B: AsMut<[u8]>>(bufs: &mut [B]) -> Vec<IoSliceMut<'_>> {
    bufs.iter_mut().map(|buf| IoSliceMut::new(buf.as_mut())).collect()
}

fn io_slices<B: AsRef<[u8]>>(bufs: &[B]) -> Vec<IoSlice<'_>> {
    bufs.iter().map(|buf| IoSlice::new(buf.as_ref())).collect()
}

// ============================================================================
// Pending operations
// ============================================================================

/// An operation between initiation and completion.
///
/// Completing delivers the handler to the context. An operation dropped
/// without running (pool rejected it, pool shut down first) delivers
/// `OperationAborted` from its `Drop`.
struct PendingOp<B, H>
where
    B: Send + 'static,
    H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
{
    name: &'static str,
    context: IoContext,
    token: CancellationToken,
    handle: FileHandle,
    buffers: Vec<B>,
    handler: Option<H>,
    _work: WorkGuard,
}

impl<B, H> PendingOp<B, H>
where
    B: Send + 'static,
    H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
{
    fn run<F>(mut self, io: F)
    where
        F: FnOnce(FileHandle, &mut [B]) -> FileResult<usize>,
    {
        let _span = tracing::trace_span!(target: "filament::service", "file_op", op = self.name)
            .entered();

        let result = if self.token.is_cancelled() {
            tracing::trace!(target: "filament::service", op = self.name, "aborted before start");
            Err(FileError::aborted())
        } else {
            io(self.handle, self.buffers.as_mut_slice())
        };
        self.complete(result);
    }

    fn complete(&mut self, result: FileResult<usize>) {
        if let Some(handler) = self.handler.take() {
            let buffers = std::mem::take(&mut self.buffers);
            self.context.post(move || handler(result, buffers));
        }
    }
}

impl<B, H> Drop for PendingOp<B, H>
where
    B: Send + 'static,
    H: FnOnce(FileResult<usize>, Vec<B>) + Send + 'static,
{
    fn drop(&mut self) {
        self.complete(Err(FileError::aborted()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn service() -> (IoContext, ThreadPoolFileService) {
        let ctx = IoContext::new();
        let service = ThreadPoolFileService::new(&ctx).unwrap();
        (ctx, service)
    }

    fn open_scratch(service: &ThreadPoolFileService, dir: &tempfile::TempDir) -> FileImpl {
        let imp = service.construct();
        service
            .open(
                &imp,
                dir.path().join("scratch"),
                OpenFlags::ACCESS_READ_WRITE | OpenFlags::CREATE_ALWAYS,
                FilePerms::CREATE_DEFAULT,
                FileAttrs::NONE,
            )
            .unwrap();
        imp
    }

    #[test]
    fn test_construct_destroy_registry() {
        let (_ctx, service) = service();
        assert_eq!(service.live_implementations(), 0);
        let a = service.construct();
        let b = service.construct();
        assert_eq!(service.live_implementations(), 2);
        assert!(!service.is_open(&a));
        service.destroy(a);
        assert_eq!(service.live_implementations(), 1);
        service.destroy(b);
        assert_eq!(service.live_implementations(), 0);
    }

    #[test]
    fn test_open_twice_already_open() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, service) = service();
        let imp = open_scratch(&service, &dir);
        let err = service
            .open(
                &imp,
                dir.path().join("other"),
                OpenFlags::ACCESS_WRITE | OpenFlags::CREATE_ALWAYS,
                FilePerms::CREATE_DEFAULT,
                FileAttrs::NONE,
            )
            .unwrap_err();
        assert_eq!(err.kind(), FileErrorKind::AlreadyOpen);
        assert!(!dir.path().join("other").exists());
        service.destroy(imp);
    }

    #[test]
    fn test_cancel_unopened_bad_descriptor() {
        let (_ctx, service) = service();
        let imp = service.construct();
        assert_eq!(service.cancel(&imp).unwrap_err().kind(), FileErrorKind::BadDescriptor);
        service.destroy(imp);
    }

    #[test]
    fn test_async_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, service) = service();
        let imp = open_scratch(&service, &dir);

        let (tx, rx) = mpsc::channel();
        let write_tx = tx.clone();
        service.async_write_some(&imp, vec![b"hello ".to_vec(), b"world!".to_vec()], move |r, _| {
            write_tx.send(("write", r.unwrap())).unwrap();
        });
        service.async_read_some_at(&imp, 0, vec![vec![0u8; 32]], move |r, bufs| {
            let n = r.unwrap();
            assert_eq!(&bufs[0][..n], b"hello world!");
            tx.send(("read", n)).unwrap();
        });

        ctx.run();
        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results, vec![("write", 12), ("read", 12)]);
        service.destroy(imp);
    }

    #[test]
    fn test_handler_never_inline() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, service) = service();
        let imp = open_scratch(&service, &dir);

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        service.async_write_some(&imp, vec![b"x".to_vec()], move |_, _| {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!called.load(Ordering::SeqCst));
        ctx.run();
        assert!(called.load(Ordering::SeqCst));
        service.destroy(imp);
    }

    #[test]
    fn test_async_after_shutdown_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, service) = service();
        let imp = open_scratch(&service, &dir);
        service.shutdown();
        assert!(service.is_shut_down());
        assert!(!service.is_open(&imp));

        let (tx, rx) = mpsc::channel();
        service.async_read_some(&imp, vec![vec![0u8; 4]], move |r, bufs| {
            tx.send((r.unwrap_err().kind(), bufs.len())).unwrap();
        });
        assert_eq!(ctx.run(), 1);
        assert_eq!(rx.recv().unwrap(), (FileErrorKind::OperationAborted, 1));
        service.destroy(imp);
    }

    #[test]
    fn test_release_keeps_handle_open() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, service) = service();
        let imp = open_scratch(&service, &dir);
        let mut handle = service.release(&imp);
        assert!(!service.is_open(&imp));
        assert!(handle.is_open());
        assert_eq!(handle.size().unwrap(), 0);

        service.assign(&imp, handle).unwrap();
        assert_eq!(service.handle(&imp), handle);
        assert_eq!(
            service.assign(&imp, handle).unwrap_err().kind(),
            FileErrorKind::AlreadyOpen
        );
        handle.clear();
        service.destroy(imp);
    }

    #[test]
    fn test_move_construct_takes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, service) = service();
        let mut a = open_scratch(&service, &dir);
        let handle = service.handle(&a);

        let b = service.move_construct(&service, &mut a);
        assert_eq!(service.handle(&b), handle);
        assert!(!service.is_open(&a));
        assert_eq!(service.live_implementations(), 2);

        service.destroy(a);
        service.destroy(b);
        assert_eq!(service.live_implementations(), 0);
    }

    #[test]
    fn test_open_race_loser_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, service) = service();
        let imp = open_scratch(&service, &dir);
        let winner = service.handle(&imp);

        let path = dir.path().join("late");
        let args = OpenArgs::new(
            OpenFlags::ACCESS_READ_WRITE | OpenFlags::CREATE_ALWAYS,
            FilePerms::CREATE_DEFAULT,
            FileAttrs::NONE,
        );
        let late = FileHandle::from_raw(native::open(&path, &args).unwrap());

        let err = adopt_opened(&imp, late, &path).unwrap_err();
        assert_eq!(err.kind(), FileErrorKind::AlreadyOpen);
        assert_eq!(err.path(), Some(path.as_path()));
        assert_eq!(service.handle(&imp), winner);

        #[cfg(unix)]
        {
            // The descriptor is closed or now belongs to some other file.
            let identity = |fd: crate::native::RawHandle| {
                let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
                (unsafe { libc::fstat(fd, stat.as_mut_ptr()) } == 0).then(|| {
                    let stat = unsafe { stat.assume_init() };
                    (stat.st_dev as u64, stat.st_ino as u64)
                })
            };
            let expected = std::fs::metadata(&path).map(|m| {
                use std::os::unix::fs::MetadataExt;
                (m.dev(), m.ino())
            });
            assert_ne!(identity(late.native_handle()), expected.ok());
        }
        service.destroy(imp);
    }

    #[test]
    fn test_move_construct_across_services() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, first) = service();
        let (_ctx2, second) = service();

        let mut source = open_scratch(&second, &dir);
        let handle = second.handle(&source);
        let moved = first.move_construct(&second, &mut source);
        assert_eq!(first.handle(&moved), handle);

        // The old service no longer reaches the moved handle.
        second.shutdown();
        assert!(first.is_open(&moved));
        assert_eq!(first.size(&moved).unwrap(), 0);

        second.destroy(source);
        first.destroy(moved);
        assert_eq!(first.live_implementations(), 0);
    }

    #[test]
    fn test_move_assign_across_services() {
        let dir = tempfile::tempdir().unwrap();
        let (_ctx, first) = service();
        let (_ctx2, second) = service();

        let mut target = first.construct();
        let mut source = open_scratch(&second, &dir);
        let handle = second.handle(&source);

        first.move_assign(&mut target, &second, &mut source);
        assert_eq!(first.live_implementations(), 0);
        assert_eq!(second.live_implementations(), 2);
        assert_eq!(second.handle(&target), handle);
        assert!(!second.is_open(&source));

        second.destroy(source);
        second.destroy(target);
        assert_eq!(second.live_implementations(), 0);
    }

    #[test]
    fn test_registry_debug_lists_entries() {
        let (_ctx, service) = service();
        let imp = service.construct();
        let text = service.registry_debug().to_string();
        assert!(text.contains("1 live"));
        assert!(text.contains("closed"));
        service.destroy(imp);
    }
}
