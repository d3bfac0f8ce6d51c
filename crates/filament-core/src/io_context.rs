//! The caller's execution context for completion handlers.
//!
//! An [`IoContext`] is a queue of handlers plus a count of outstanding
//! work. Threads that call [`IoContext::run`] (or one of its variants)
//! execute queued handlers; background operations post their completion
//! handlers back here so user code always runs on a thread the user chose.
//!
//! # How It Works
//!
//! 1. An asynchronous operation calls [`IoContext::work_started`] (usually
//!    through a [`WorkGuard`]) so that `run()` keeps waiting for it.
//!
//! 2. When the operation finishes on a worker thread it posts its handler
//!    with [`IoContext::post`] and then releases its work guard.
//!
//! 3. `run()` pops and executes handlers until the context is stopped or
//!    there is neither queued nor outstanding work.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use filament_core::io_context::IoContext;
//!
//! let ctx = IoContext::new();
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..3 {
//!     let counter = counter.clone();
//!     ctx.post(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! assert_eq!(ctx.run(), 3);
//! assert_eq!(counter.load(Ordering::SeqCst), 3);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

/// Global counter for unique context IDs.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Contexts whose `run` family is currently executing on this thread.
    static RUNNING_CONTEXTS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// A type-erased handler that can be executed later.
struct Invocation {
    invoke: Box<dyn FnOnce() + Send>,
}

impl Invocation {
    fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
        }
    }

    fn execute(self) {
        (self.invoke)();
    }
}

/// Queue state, guarded by one mutex.
struct ContextState {
    handlers: VecDeque<Invocation>,
    /// Queued handlers plus explicitly started work.
    outstanding_work: usize,
    stopped: bool,
}

struct ContextInner {
    id: u64,
    state: Mutex<ContextState>,
    condvar: Condvar,
}

/// A handle to an execution context.
///
/// Cloning is cheap; every clone refers to the same queue.
#[derive(Clone)]
pub struct IoContext {
    inner: Arc<ContextInner>,
}

impl IoContext {
    /// Create a new, empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ContextState {
                    handlers: VecDeque::new(),
                    outstanding_work: 0,
                    stopped: false,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Unique identifier of this context.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Queue a handler. It never runs inside this call.
    pub fn post<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.outstanding_work += 1;
        state.handlers.push_back(Invocation::new(handler));
        drop(state);
        self.inner.condvar.notify_one();
    }

    /// Run a handler inline if the calling thread is currently running this
    /// context, otherwise queue it like [`post`](Self::post).
    pub fn dispatch<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.running_in_this_thread() {
            handler();
        } else {
            self.post(handler);
        }
    }

    /// Whether the calling thread is inside this context's `run` family.
    pub fn running_in_this_thread(&self) -> bool {
        RUNNING_CONTEXTS.with(|running| running.borrow().contains(&self.inner.id))
    }

    /// Record that an operation is in flight.
    pub fn work_started(&self) {
        self.inner.state.lock().outstanding_work += 1;
    }

    /// Record that an operation has completed.
    pub fn work_finished(&self) {
        let mut state = self.inner.state.lock();
        state.outstanding_work = state.outstanding_work.saturating_sub(1);
        let idle = state.outstanding_work == 0;
        drop(state);
        if idle {
            self.inner.condvar.notify_all();
        }
    }

    /// Create a guard that keeps the context busy until dropped.
    pub fn work_guard(&self) -> WorkGuard {
        self.work_started();
        WorkGuard {
            context: Some(self.clone()),
        }
    }

    /// Number of queued handlers plus outstanding work.
    pub fn outstanding_work(&self) -> usize {
        self.inner.state.lock().outstanding_work
    }

    /// Run handlers until stopped or out of work. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut count = 0;
        while self.run_one() > 0 {
            count += 1;
        }
        count
    }

    /// Run at most one handler, blocking while work is outstanding.
    pub fn run_one(&self) -> usize {
        let invocation = {
            let mut state = self.inner.state.lock();
            loop {
                if state.stopped {
                    return 0;
                }
                if let Some(invocation) = state.handlers.pop_front() {
                    break invocation;
                }
                if state.outstanding_work == 0 {
                    return 0;
                }
                self.inner.condvar.wait(&mut state);
            }
        };
        self.execute(invocation);
        1
    }

    /// Run every handler that is ready without blocking.
    pub fn poll(&self) -> usize {
        let mut count = 0;
        while self.poll_one() > 0 {
            count += 1;
        }
        count
    }

    /// Run at most one ready handler without blocking.
    pub fn poll_one(&self) -> usize {
        let invocation = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return 0;
            }
            match state.handlers.pop_front() {
                Some(invocation) => invocation,
                None => return 0,
            }
        };
        self.execute(invocation);
        1
    }

    /// Stop the context. Running `run` calls return as soon as possible.
    pub fn stop(&self) {
        self.inner.state.lock().stopped = true;
        self.inner.condvar.notify_all();
        tracing::trace!(target: "filament_core::context", id = self.inner.id, "context stopped");
    }

    /// Whether the context has been stopped.
    pub fn stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Clear the stopped flag so the context can run again.
    pub fn restart(&self) {
        self.inner.state.lock().stopped = false;
    }

    /// Execute one dequeued handler with this context marked as running.
    fn execute(&self, invocation: Invocation) {
        let _running = RunningGuard::enter(self.inner.id);
        let _work = WorkGuard {
            context: Some(self.clone()),
        };
        invocation.execute();
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("IoContext")
            .field("id", &self.inner.id)
            .field("queued", &state.handlers.len())
            .field("outstanding_work", &state.outstanding_work)
            .field("stopped", &state.stopped)
            .finish()
    }
}

/// Keeps an [`IoContext`] from running out of work while alive.
///
/// Dropping the guard (or calling [`reset`](Self::reset)) reports the work
/// as finished exactly once.
#[must_use = "dropping the guard immediately finishes the work"]
pub struct WorkGuard {
    context: Option<IoContext>,
}

impl WorkGuard {
    /// The context this guard keeps busy, if not yet reset.
    pub fn context(&self) -> Option<&IoContext> {
        self.context.as_ref()
    }

    /// Finish the work early.
    pub fn reset(&mut self) {
        if let Some(context) = self.context.take() {
            context.work_finished();
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard")
            .field("context", &self.context.as_ref().map(IoContext::id))
            .finish()
    }
}

/// Marks a context as running on the current thread for its lifetime.
struct RunningGuard;

impl RunningGuard {
    fn enter(id: u64) -> Self {
        RUNNING_CONTEXTS.with(|running| running.borrow_mut().push(id));
        RunningGuard
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING_CONTEXTS.with(|running| {
            running.borrow_mut().pop();
        });
    }
}

static_assertions::assert_impl_all!(IoContext: Send, Sync, Clone);
static_assertions::assert_impl_all!(WorkGuard: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_run_empty_returns_immediately() {
        let ctx = IoContext::new();
        assert_eq!(ctx.run(), 0);
        assert!(!ctx.stopped());
    }

    #[test]
    fn test_post_does_not_run_inline() {
        let ctx = IoContext::new();
        let ran = Arc::new(AtomicBool::new(false));

        let ran_clone = ran.clone();
        ctx.post(move || ran_clone.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(ctx.outstanding_work(), 1);

        assert_eq!(ctx.run(), 1);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(ctx.outstanding_work(), 0);
    }

    #[test]
    fn test_handlers_run_in_post_order() {
        let ctx = IoContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            ctx.post(move || order.lock().push(i));
        }
        ctx.run();

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_dispatch_inside_run_is_inline() {
        let ctx = IoContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_ctx = ctx.clone();
        let inner_order = order.clone();
        ctx.post(move || {
            let dispatched = inner_order.clone();
            inner_ctx.dispatch(move || dispatched.lock().push("dispatched"));
            inner_order.lock().push("after dispatch");
        });
        ctx.run();

        assert_eq!(*order.lock(), vec!["dispatched", "after dispatch"]);
    }

    #[test]
    fn test_dispatch_outside_run_is_queued() {
        let ctx = IoContext::new();
        let ran = Arc::new(AtomicBool::new(false));

        let ran_clone = ran.clone();
        ctx.dispatch(move || ran_clone.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!ctx.running_in_this_thread());

        ctx.run();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_waits_for_outstanding_work() {
        let ctx = IoContext::new();
        let guard = ctx.work_guard();
        let ran = Arc::new(AtomicBool::new(false));

        let remote = ctx.clone();
        let ran_clone = ran.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.post(move || ran_clone.store(true, Ordering::SeqCst));
            drop(guard);
        });

        assert_eq!(ctx.run(), 1);
        assert!(ran.load(Ordering::SeqCst));
        producer.join().unwrap();
    }

    #[test]
    fn test_stop_and_restart() {
        let ctx = IoContext::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let stopper = ctx.clone();
        ctx.post(move || stopper.stop());
        for _ in 0..2 {
            let counter = counter.clone();
            ctx.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(ctx.run(), 1);
        assert!(ctx.stopped());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.poll(), 0);

        ctx.restart();
        assert_eq!(ctx.run(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_wakes_blocked_run() {
        let ctx = IoContext::new();
        let _guard = ctx.work_guard();

        let remote = ctx.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });

        assert_eq!(ctx.run(), 0);
        stopper.join().unwrap();
    }

    #[test]
    fn test_poll_does_not_block() {
        let ctx = IoContext::new();
        let _guard = ctx.work_guard();
        assert_eq!(ctx.poll(), 0);
        assert_eq!(ctx.poll_one(), 0);

        ctx.post(|| {});
        assert_eq!(ctx.poll_one(), 1);
    }

    #[test]
    fn test_work_guard_reset_once() {
        let ctx = IoContext::new();
        let mut guard = ctx.work_guard();
        assert_eq!(ctx.outstanding_work(), 1);
        guard.reset();
        guard.reset();
        assert!(guard.context().is_none());
        drop(guard);
        assert_eq!(ctx.outstanding_work(), 0);
    }

    #[test]
    fn test_multiple_run_threads() {
        let ctx = IoContext::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = counter.clone();
            ctx.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let runners: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                thread::spawn(move || ctx.run())
            })
            .collect();
        let total: usize = runners.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 100);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
