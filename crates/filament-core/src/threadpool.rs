//! Fixed-size pool of blocking worker threads.
//!
//! The pool runs boxed closures on a set of named, dedicated threads that
//! share one FIFO task queue. It exists to absorb blocking system calls
//! (file reads and writes) so that the caller's [`IoContext`] never blocks.
//!
//! With a single worker thread (the default) tasks run strictly in the
//! order they were submitted. With more threads, tasks are dequeued in
//! order but may complete out of order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use filament_core::threadpool::{ThreadPool, ThreadPoolBuilder};
//!
//! let pool = ThreadPoolBuilder::new().threads(2).name("example-io").build().unwrap();
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..10 {
//!     let counter = counter.clone();
//!     pool.execute(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }).unwrap();
//! }
//!
//! // Finishes queued tasks, then joins every worker.
//! pool.shutdown();
//! assert_eq!(counter.load(Ordering::SeqCst), 10);
//! ```
//!
//! [`IoContext`]: crate::io_context::IoContext

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use parking_lot::Mutex;

use crate::error::{Result, ThreadPoolError};

/// Default number of worker threads.
const DEFAULT_THREADS: usize = 1;

/// A boxed task closure.
type PoolTask = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for creating a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. Must be at least one.
    pub num_threads: usize,
    /// Name prefix for worker threads. Threads are named `{prefix}-{index}`.
    pub thread_name: String,
    /// Stack size for worker threads in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
    /// Capacity of the task queue. `None` means unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_THREADS,
            thread_name: "filament-io".to_string(),
            stack_size: None,
            queue_capacity: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Create a new configuration with custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }
}

/// Builder for creating thread pools with custom configuration.
#[derive(Debug, Default)]
pub struct ThreadPoolBuilder {
    config: ThreadPoolConfig,
}

impl ThreadPoolBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Set the thread name prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the stack size for worker threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Bound the task queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }

    /// Build and start the pool.
    pub fn build(self) -> Result<ThreadPool> {
        ThreadPool::with_config(self.config)
    }
}

/// State shared between the pool handle and its worker threads.
struct PoolState {
    /// Whether the pool accepts new tasks.
    running: AtomicBool,
    /// Tasks submitted but not yet finished.
    pending_tasks: AtomicUsize,
}

/// A fixed-size pool of dedicated worker threads.
///
/// `ThreadPool` is `Send + Sync`; any thread may submit tasks. Dropping the
/// pool shuts it down and joins its workers.
pub struct ThreadPool {
    /// Channel sender for submitting tasks. `None` once shut down.
    task_sender: Mutex<Option<Sender<PoolTask>>>,
    /// Worker thread handles for joining.
    handles: Mutex<Vec<JoinHandle<()>>>,
    /// Shared state with the worker threads.
    state: Arc<PoolState>,
    num_threads: usize,
}

impl ThreadPool {
    /// Create a pool with the default configuration (one worker).
    pub fn new() -> Result<Self> {
        Self::with_config(ThreadPoolConfig::default())
    }

    /// Create a pool with a custom configuration.
    pub fn with_config(config: ThreadPoolConfig) -> Result<Self> {
        if config.num_threads == 0 {
            return Err(ThreadPoolError::NoThreads);
        }

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let state = Arc::new(PoolState {
            running: AtomicBool::new(true),
            pending_tasks: AtomicUsize::new(0),
        });

        let pool = Self {
            task_sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::with_capacity(config.num_threads)),
            state,
            num_threads: config.num_threads,
        };

        for index in 0..config.num_threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name, index));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let thread_receiver = receiver.clone();
            let thread_state = pool.state.clone();
            match builder.spawn(move || worker_loop(thread_receiver, thread_state)) {
                Ok(handle) => pool.handles.lock().push(handle),
                Err(err) => {
                    // Workers already started exit once the sender is gone.
                    pool.shutdown();
                    return Err(ThreadPoolError::Spawn(err));
                }
            }
        }

        tracing::debug!(
            target: "filament_core::pool",
            threads = config.num_threads,
            name = %config.thread_name,
            "thread pool started"
        );

        Ok(pool)
    }

    /// Queue a task for execution on a worker thread.
    ///
    /// On failure the task is dropped without running. Callers that must
    /// observe every task (completion handlers, for instance) should put
    /// that logic in the task's `Drop`.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(ThreadPoolError::ShutDown);
        }

        // Clone the sender so a full bounded queue never blocks shutdown.
        let sender = match self.task_sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(ThreadPoolError::ShutDown),
        };

        self.state.pending_tasks.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(Box::new(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                Err(ThreadPoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                Err(ThreadPoolError::ShutDown)
            }
        }
    }

    /// Check if the pool still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Number of tasks queued or executing.
    pub fn pending_tasks(&self) -> usize {
        self.state.pending_tasks.load(Ordering::Acquire)
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Stop accepting tasks, let the workers drain the queue, and join them.
    ///
    /// Idempotent. When called from one of the pool's own workers, that
    /// worker is detached instead of joined.
    pub fn shutdown(&self) {
        self.state.running.store(false, Ordering::Release);
        // Dropping the last sender disconnects the channel once it is drained.
        drop(self.task_sender.lock().take());

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                crate::filament_warn!("worker thread panicked");
            }
        }

        tracing::debug!(target: "filament_core::pool", "thread pool shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads)
            .field("running", &self.is_running())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

static_assertions::assert_impl_all!(ThreadPool: Send, Sync);

/// The worker loop. Runs until every sender is gone and the queue is empty.
fn worker_loop(receiver: Receiver<PoolTask>, state: Arc<PoolState>) {
    for task in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            crate::filament_error!("task panicked on worker thread");
        }
        state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_pool_creation() {
        let pool = ThreadPool::new().unwrap();
        assert!(pool.is_running());
        assert_eq!(pool.num_threads(), 1);
        assert_eq!(pool.pending_tasks(), 0);
        pool.shutdown();
        assert!(!pool.is_running());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = ThreadPool::with_config(ThreadPoolConfig::with_threads(0));
        assert!(matches!(result, Err(ThreadPoolError::NoThreads)));
    }

    #[test]
    fn test_builder() {
        let builder = ThreadPoolBuilder::new()
            .threads(3)
            .name("test-pool")
            .stack_size(256 * 1024)
            .queue_capacity(16);

        assert_eq!(builder.config().num_threads, 3);
        assert_eq!(builder.config().thread_name, "test-pool");
        assert_eq!(builder.config().queue_capacity, Some(16));

        let pool = builder.build().unwrap();
        assert_eq!(pool.num_threads(), 3);
    }

    #[test]
    fn test_thread_names() {
        let pool = ThreadPoolBuilder::new().name("named").build().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        })
        .unwrap();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let pool = ThreadPool::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = order.clone();
            pool.execute(move || order.lock().push(i)).unwrap();
        }

        pool.shutdown();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = ThreadPool::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            pool.execute(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.pending_tasks(), 0);
    }

    #[test]
    fn test_execute_after_shutdown() {
        let pool = ThreadPool::new().unwrap();
        pool.shutdown();
        assert!(matches!(pool.execute(|| {}), Err(ThreadPoolError::ShutDown)));
        // Second shutdown is a no-op.
        pool.shutdown();
    }

    #[test]
    fn test_rejected_task_is_dropped() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let pool = ThreadPool::new().unwrap();
        pool.shutdown();

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let _ = pool.execute(move || {
            let _flag = flag;
        });
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_queue_full() {
        let pool = ThreadPoolBuilder::new().queue_capacity(1).build().unwrap();
        let gate = Arc::new(Barrier::new(2));
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);

        // Occupy the single worker.
        let worker_gate = gate.clone();
        pool.execute(move || {
            let _ = started_tx.send(());
            worker_gate.wait();
        })
        .unwrap();
        started_rx.recv().unwrap();

        pool.execute(|| {}).unwrap();
        assert!(matches!(pool.execute(|| {}), Err(ThreadPoolError::QueueFull)));

        gate.wait();
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = ThreadPool::new().unwrap();
        pool.execute(|| panic!("task failure")).unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(7);
        })
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_multiple_submitters() {
        let pool = Arc::new(ThreadPoolBuilder::new().threads(4).build().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..4 {
            let pool = pool.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    let counter = counter.clone();
                    pool.execute(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
