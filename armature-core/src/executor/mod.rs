//! Per-thread executors and the cross-thread task channel.
//!
//! Every service host owns exactly one [`Executor`]: a cheap-clone,
//! thread-safe handle that other threads use to post work onto the host's
//! thread. The receiving half, the [`ExecutorQueue`], is pumped on the owner
//! thread: a blocking run loop on managed worker threads, the cooperative
//! host's poll cycle on the main thread.
//!
//! A posted task is a `Send` closure that runs on the owner thread and
//! returns a (possibly non-`Send`) future, which the pump then drives to
//! completion alongside other in-flight tasks. Tasks posted through one
//! executor start in the order they were posted.

use std::sync::Arc;

use futures_channel::{
    mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    oneshot::Receiver as OneshotReceiver,
};
use futures_util::{future::LocalBoxFuture, select, stream::FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tracing::debug;

mod runtime;
pub use runtime::WorkerRuntime;

/// A unit of work for an executor: runs on the owner thread and yields the
/// future the pump should drive.
pub type ExecutorTask = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send + 'static>;

/// Callback invoked whenever work is posted, to nudge a host event loop.
///
/// Invoked from arbitrary threads; implementations must be thread-safe.
pub type WakeCallback = Box<dyn Fn() + Send + Sync + 'static>;

#[derive(Default)]
struct WakeHook {
    callback: Mutex<Option<WakeCallback>>,
}

impl WakeHook {
    fn set(&self, callback: Option<WakeCallback>) {
        *self.callback.lock() = callback;
    }

    fn trigger(&self) {
        if let Some(callback) = &*self.callback.lock() {
            callback();
        }
    }
}

/// Thread-safe posting handle for one host thread.
#[derive(Clone)]
pub struct Executor {
    tasks: UnboundedSender<ExecutorTask>,
    wake: Arc<WakeHook>,
}

impl Executor {
    /// Posts a task onto the owner thread and fires the wake callback.
    ///
    /// Returns `false` when the executor's queue is closed (the owning run
    /// loop has exited); the task is then dropped without running.
    pub fn post(&self, task: ExecutorTask) -> bool {
        if self.tasks.unbounded_send(task).is_err() {
            return false;
        }
        self.wake.trigger();
        true
    }

    /// Posts a plain closure (no follow-up future) onto the owner thread.
    pub fn post_fn<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(move || {
            f();
            Box::pin(async {})
        }))
    }

    /// Installs (or clears, with `None`) the wake callback fired after each
    /// post. The callback may be invoked from any thread.
    pub fn set_wake_callback(&self, callback: Option<WakeCallback>) {
        self.wake.set(callback);
    }

    /// Whether the owning run loop is gone and posts would be rejected.
    pub fn is_closed(&self) -> bool {
        self.tasks.is_closed()
    }
}

/// Receiving half of an [`Executor`], pumped on the owner thread.
pub struct ExecutorQueue {
    tasks: UnboundedReceiver<ExecutorTask>,
}

impl ExecutorQueue {
    /// Takes one posted task if one is immediately available.
    pub fn try_take(&mut self) -> Option<ExecutorTask> {
        match self.tasks.try_next() {
            Ok(Some(task)) => Some(task),
            _ => None,
        }
    }

    /// Runs the queue until `stop` fires or all executors are dropped.
    ///
    /// This is the managed-thread run loop: it interleaves accepting new
    /// tasks with driving the futures of tasks already started. When the
    /// stop signal arrives, work that was already queued or in flight is
    /// drained to completion before returning; nothing new is accepted
    /// afterwards because dropping the queue closes the channel.
    pub async fn run(mut self, stop: OneshotReceiver<()>) {
        let mut stop = stop;
        let mut pending: FuturesUnordered<LocalBoxFuture<'static, ()>> = FuturesUnordered::new();

        loop {
            if pending.is_empty() {
                select! {
                    _ = &mut stop => break,
                    task = self.tasks.next() => match task {
                        Some(task) => pending.push(task()),
                        None => break,
                    },
                }
            } else {
                select! {
                    _ = &mut stop => break,
                    task = self.tasks.next() => match task {
                        Some(task) => pending.push(task()),
                        None => break,
                    },
                    _ = pending.next() => {}
                }
            }
        }

        // Keepalive released: let queued work and in-flight futures finish.
        loop {
            while let Some(task) = self.try_take() {
                pending.push(task());
            }
            if pending.is_empty() {
                break;
            }
            pending.next().await;
        }
        debug!("executor queue drained, run loop exiting");
    }
}

/// Creates a connected executor handle and queue for one host thread.
pub fn executor_pair() -> (Executor, ExecutorQueue) {
    let (tx, rx) = unbounded();
    (
        Executor {
            tasks: tx,
            wake: Arc::new(WakeHook::default()),
        },
        ExecutorQueue { tasks: rx },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_channel::oneshot;

    use super::*;

    #[test]
    fn test_post_runs_in_fifo_order() {
        let (executor, queue) = executor_pair();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let log = log.clone();
            assert!(executor.post_fn(move || log.lock().push(i)));
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        drop(executor);
        let _keep = stop_tx;
        futures_executor::block_on(queue.run(stop_rx));
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_after_queue_dropped_fails() {
        let (executor, queue) = executor_pair();
        drop(queue);
        assert!(executor.is_closed());
        assert!(!executor.post_fn(|| {}));
    }

    #[test]
    fn test_stop_drains_queued_work() {
        let (executor, queue) = executor_pair();
        let counter = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = oneshot::channel();
        for _ in 0..4 {
            let counter = counter.clone();
            executor.post_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        stop_tx.send(()).unwrap();
        futures_executor::block_on(queue.run(stop_rx));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_wake_callback_fires_on_post() {
        let (executor, _queue) = executor_pair();
        let wakes = Arc::new(AtomicUsize::new(0));
        let observed = wakes.clone();
        executor.set_wake_callback(Some(Box::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        })));
        executor.post_fn(|| {});
        executor.post_fn(|| {});
        assert_eq!(wakes.load(Ordering::SeqCst), 2);

        executor.set_wake_callback(None);
        executor.post_fn(|| {});
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }
}
