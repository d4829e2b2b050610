//! The cooperative host variant for the main thread.
//!
//! Owns an executor but no thread: the application's own loop drives it by
//! calling [`poll`](CooperativeThreadHost::poll) /
//! [`update`](CooperativeThreadHost::update). Cross-thread posts can nudge
//! the loop through the wake callback. The pump itself (a local task pool)
//! is inseparable from the thread that created the host, which also makes
//! owner-thread affinity a compile-time property of this type.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use futures_executor::LocalPool;
use futures_util::task::LocalSpawnExt;
use tracing::error;

use super::{ServiceHost, ServiceHostProxy};
use crate::dispatch::{DispatchContext, ExecutorContext, LifeTracker};
use crate::executor::{executor_pair, ExecutorQueue, WakeCallback};
use crate::service::ProcessResult;

/// Service host integrated with a host-provided main loop.
pub struct CooperativeThreadHost {
    host: Arc<ServiceHost>,
    /// Keeps the dispatch source alive; dropping it invalidates every
    /// in-flight result aimed at this thread.
    _life: Arc<LifeTracker>,
    source_context: ExecutorContext<LifeTracker>,
    proxy: ServiceHostProxy,
    queue: ExecutorQueue,
    pool: LocalPool,
}

impl CooperativeThreadHost {
    /// Creates the host bound to the calling thread.
    pub fn new() -> Self {
        let (executor, queue) = executor_pair();
        let host = ServiceHost::new(executor.clone(), None);
        let life = Arc::new(LifeTracker);
        let source_context = ExecutorContext::new(&life, executor.clone());
        let target_context = ExecutorContext::new(&host, executor);
        let proxy = ServiceHostProxy::new(DispatchContext::new(
            source_context.clone(),
            target_context,
        ));
        Self {
            host,
            _life: life,
            source_context,
            proxy,
            queue,
            pool: LocalPool::new(),
        }
    }

    /// The underlying host core.
    pub fn service_host(&self) -> &Arc<ServiceHost> {
        &self.host
    }

    /// Thread-safe proxy other threads can use to reach this host.
    pub fn proxy(&self) -> &ServiceHostProxy {
        &self.proxy
    }

    /// The context representing "this thread's caller side", used as the
    /// dispatch source for proxies built against other hosts.
    pub fn executor_context(&self) -> ExecutorContext<LifeTracker> {
        self.source_context.clone()
    }

    /// Installs (or clears) the callback that nudges the surrounding event
    /// loop whenever work is posted. Invoked from arbitrary threads.
    pub fn set_wake_callback(&self, callback: Option<WakeCallback>) {
        self.host.executor().set_wake_callback(callback);
    }

    /// Posts a closure onto this host and fires the wake callback.
    pub fn post_with_wake<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.host.executor().post_fn(f)
    }

    /// Spawns a local future onto this host's pump.
    pub fn spawn_local<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if let Err(e) = self.pool.spawner().spawn_local(future) {
            error!(error = %e, "failed to spawn local task");
        }
    }

    /// Runs all currently-ready work without blocking.
    ///
    /// Drains posted tasks into the pump and advances in-flight futures
    /// until everything stalls. Returns the number of posted tasks started.
    pub fn poll(&mut self) -> usize {
        let spawner = self.pool.spawner();
        let mut ran = 0;
        self.pool.run_until_stalled();
        loop {
            let mut drained = 0;
            while let Some(task) = self.queue.try_take() {
                if let Err(e) = spawner.spawn_local(task()) {
                    error!(error = %e, "failed to spawn posted task");
                    return ran;
                }
                drained += 1;
            }
            if drained == 0 {
                break;
            }
            ran += drained;
            self.pool.run_until_stalled();
        }
        ran
    }

    /// One main-loop tick: [`poll`](Self::poll), then process every service,
    /// folding their results. A pending shutdown request merges `Quit`.
    pub fn update(&mut self) -> ProcessResult {
        self.poll();
        let mut result = match self.host.process_services() {
            Ok(result) => result,
            Err(e) => {
                // Unreachable through this wrapper (it cannot leave its
                // thread); treated as fatal for the loop if it ever happens.
                error!(error = %e, "process_services failed");
                ProcessResult::Quit
            }
        };
        if self.host.is_shutdown_requested() {
            result = result.merge(ProcessResult::Quit);
        }
        result
    }

    /// Pumps this host until `future` completes, parking between polls and
    /// waking on posted work. Intended for startup/shutdown sequencing and
    /// tests; steady-state applications drive [`update`](Self::update) from
    /// their own loop instead.
    pub fn run_until<T, F>(&mut self, future: F) -> T
    where
        T: 'static,
        F: Future<Output = T> + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        self.spawn_local(async move {
            let _ = tx.send(future.await);
        });

        let thread = std::thread::current();
        self.set_wake_callback(Some(Box::new(move || thread.unpark())));
        let result = loop {
            self.poll();
            match rx.try_recv() {
                Ok(Some(value)) => break value,
                Ok(None) => std::thread::park_timeout(Duration::from_millis(10)),
                Err(_) => panic!("future dropped by the pump before completing"),
            }
        };
        self.set_wake_callback(None);
        result
    }
}

impl Default for CooperativeThreadHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::dispatch::invoke_async;

    use super::*;

    #[test]
    fn test_poll_runs_posted_work() {
        let mut host = CooperativeThreadHost::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            assert!(host.post_with_wake(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(host.poll(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(host.poll(), 0);
    }

    #[test]
    fn test_wake_callback_fires_for_cross_thread_posts() {
        let host = CooperativeThreadHost::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let observed = wakes.clone();
        host.set_wake_callback(Some(Box::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        })));

        let executor = host.service_host().executor().clone();
        thread::spawn(move || {
            executor.post_fn(|| {});
        })
        .join()
        .unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_reports_quit_after_shutdown_request() {
        let mut host = CooperativeThreadHost::new();
        assert_eq!(host.update(), ProcessResult::NoSleepLimit);
        host.service_host().request_shutdown();
        assert_eq!(host.update(), ProcessResult::Quit);
    }

    #[test]
    fn test_run_until_completes_cross_thread_invocations() {
        let mut host = CooperativeThreadHost::new();
        let value = Arc::new(41u32);
        let context = ExecutorContext::new(&value, host.service_host().executor().clone());

        // The invocation is posted to this host's own queue; run_until must
        // pump it and resolve the awaitable.
        let result = host
            .run_until(async move {
                invoke_async(&context, |value: Arc<u32>| async move { *value + 1 }).await
            })
            .unwrap();
        assert_eq!(result, 42);
    }
}
