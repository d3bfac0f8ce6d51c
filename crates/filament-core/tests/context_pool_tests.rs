//! Tests for the I/O context and worker pool working together.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use filament_core::{
    CancellationSource, IoContext, ThreadPool, ThreadPoolBuilder, ThreadPoolError,
};

#[test]
fn test_run_waits_for_outstanding_work() {
    let ctx = IoContext::new();
    let pool = ThreadPool::new().unwrap();
    let value = Arc::new(AtomicUsize::new(0));

    let work = ctx.work_guard();
    let remote = ctx.clone();
    let slot = value.clone();
    pool.execute(move || {
        thread::sleep(Duration::from_millis(20));
        remote.post(move || slot.store(42, Ordering::SeqCst));
        drop(work);
    })
    .unwrap();

    assert_eq!(ctx.run(), 1);
    assert_eq!(value.load(Ordering::SeqCst), 42);
    assert_eq!(ctx.outstanding_work(), 0);
}

#[test]
fn test_run_returns_when_idle() {
    let ctx = IoContext::new();
    assert_eq!(ctx.run(), 0);
    assert!(!ctx.stopped());

    // The context is reusable without a restart.
    ctx.post(|| {});
    assert_eq!(ctx.run(), 1);
}

#[test]
fn test_single_worker_runs_in_order() {
    let ctx = IoContext::new();
    let pool = ThreadPool::new().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..32 {
        let work = ctx.work_guard();
        let remote = ctx.clone();
        let order = order.clone();
        pool.execute(move || {
            remote.post(move || order.lock().unwrap().push(i));
            drop(work);
        })
        .unwrap();
    }

    assert_eq!(ctx.run(), 32);
    assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
}

#[test]
fn test_stop_from_handler() {
    let ctx = IoContext::new();
    let ran = Arc::new(AtomicUsize::new(0));

    let stopper = ctx.clone();
    ctx.post(move || stopper.stop());
    for _ in 0..3 {
        let ran = ran.clone();
        ctx.post(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert_eq!(ctx.run(), 1);
    assert!(ctx.stopped());
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    ctx.restart();
    assert_eq!(ctx.run(), 3);
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cancelled_tasks_skip_work() {
    let ctx = IoContext::new();
    let pool = ThreadPool::new().unwrap();
    let source = CancellationSource::new();
    let gate = Arc::new(Mutex::new(()));
    let performed = Arc::new(AtomicBool::new(false));
    let aborted = Arc::new(AtomicBool::new(false));

    // Hold the only worker until the cancel has happened.
    let held = gate.lock().unwrap();
    let blocker_gate = gate.clone();
    pool.execute(move || drop(blocker_gate.lock())).unwrap();

    let token = source.token();
    let work = ctx.work_guard();
    let remote = ctx.clone();
    let did_work = performed.clone();
    let saw_abort = aborted.clone();
    pool.execute(move || {
        if token.is_cancelled() {
            remote.post(move || saw_abort.store(true, Ordering::SeqCst));
        } else {
            did_work.store(true, Ordering::SeqCst);
        }
        drop(work);
    })
    .unwrap();

    source.cancel();
    drop(held);
    ctx.run();

    assert!(aborted.load(Ordering::SeqCst));
    assert!(!performed.load(Ordering::SeqCst));
}

#[test]
fn test_pool_drains_queue_on_shutdown() {
    let pool = ThreadPoolBuilder::new().threads(2).name("drain").build().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = counter.clone();
        pool.execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert!(!pool.is_running());
    assert!(matches!(pool.execute(|| {}), Err(ThreadPoolError::ShutDown)));
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
    let result = pool.execute(move || {
        let _keep = &flag;
    });
    assert!(result.is_err());
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_worker_thread_names() {
    let pool = ThreadPoolBuilder::new().name("named-io").build().unwrap();
    let name = Arc::new(Mutex::new(None));
    let slot = name.clone();
    pool.execute(move || {
        *slot.lock().unwrap() = thread::current().name().map(str::to_string);
    })
    .unwrap();
    pool.shutdown();
    assert_eq!(name.lock().unwrap().as_deref(), Some("named-io-0"));
}

#[test]
fn test_dispatch_inline_only_inside_run() {
    let ctx = IoContext::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    // Outside run: queued.
    let outer = log.clone();
    ctx.dispatch(move || outer.lock().unwrap().push("outside"));
    assert!(log.lock().unwrap().is_empty());

    // Inside run: runs before the dispatching handler returns.
    let inner_ctx = ctx.clone();
    let inner = log.clone();
    ctx.post(move || {
        let nested = inner.clone();
        inner_ctx.dispatch(move || nested.lock().unwrap().push("inline"));
        inner.lock().unwrap().push("after");
    });

    ctx.run();
    assert_eq!(*log.lock().unwrap(), vec!["outside", "inline", "after"]);
}
