//! The managed host variant: one dedicated OS thread per thread group.
//!
//! [`ManagedThreadHost`] owns the thread. On that thread it builds the
//! runtime, constructs the [`ServiceHost`] core (binding provider and owner
//! checks to the worker), and blocks on the executor queue's run loop until
//! the keepalive is released by a shutdown request. The only strong
//! reference to the host core lives on the worker thread, so once the run
//! loop exits the host is gone and proxies observe `ServiceDisposed`.

use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures_channel::oneshot;
use tracing::{debug, info, warn};

use super::{ServiceHost, ServiceHostProxy};
use crate::config::RuntimeConfig;
use crate::dispatch::{DispatchContext, ExecutorContext, LifeTracker};
use crate::executor::{executor_pair, Executor, WorkerRuntime};
use crate::registry::ServiceThreadGroupId;
use crate::FrameworkError;

/// Handle returned from a successful [`ManagedThreadHost::start`].
///
/// The lifetime channel resolves when the managed thread has exited; if the
/// thread dies abnormally the channel is dropped, which reads as finished.
#[derive(Debug)]
pub struct ManagedThreadRecord {
    lifetime: oneshot::Receiver<()>,
}

impl ManagedThreadRecord {
    /// Whether the managed thread has already exited.
    pub fn is_finished(&mut self) -> bool {
        !matches!(self.lifetime.try_recv(), Ok(None))
    }

    /// Resolves once the managed thread has exited.
    pub async fn finished(self) {
        let _ = self.lifetime.await;
    }
}

struct StartedState {
    proxy: ServiceHostProxy,
}

/// Owns a dedicated worker thread and the service host running on it.
pub struct ManagedThreadHost {
    thread_group_id: ServiceThreadGroupId,
    runtime_config: RuntimeConfig,
    join: Option<JoinHandle<()>>,
    started: Option<StartedState>,
}

impl ManagedThreadHost {
    pub fn new(thread_group_id: ServiceThreadGroupId, runtime_config: RuntimeConfig) -> Self {
        Self {
            thread_group_id,
            runtime_config,
            join: None,
            started: None,
        }
    }

    pub fn thread_group_id(&self) -> ServiceThreadGroupId {
        self.thread_group_id
    }

    /// Thread-safe proxy to the host, available once started.
    pub fn proxy(&self) -> Option<&ServiceHostProxy> {
        self.started.as_ref().map(|state| &state.proxy)
    }

    /// Spawns the worker thread and waits for its start handshake.
    ///
    /// On the worker: bind the CPU if configured, build the runtime,
    /// construct the host core, signal readiness, then block on the run
    /// loop. `source` is the calling side's lifetime context, used as the
    /// dispatch source of the returned proxy.
    pub fn start(
        &mut self,
        source: ExecutorContext<LifeTracker>,
    ) -> Result<ManagedThreadRecord, FrameworkError> {
        if self.join.is_some() {
            return Err(FrameworkError::InvalidArgument(format!(
                "managed thread host for group {} already started",
                self.thread_group_id
            )));
        }

        let (ready_tx, ready_rx) = sync_channel::<(Arc<ServiceHost>, Executor)>(1);
        let (lifetime_tx, lifetime_rx) = oneshot::channel();
        let config = self.runtime_config.clone();
        let group_id = self.thread_group_id;

        let join = thread::Builder::new()
            .name(format!("armature-worker-{}", group_id.value()))
            .spawn(move || {
                if config.cpu_affinity {
                    if let Ok(cores) = thread::available_parallelism() {
                        let core = group_id.value() as usize % cores.get();
                        if let Err(e) = monoio::utils::bind_to_cpu_set([core]) {
                            warn!(
                                group = group_id.value(),
                                core, "binding worker thread to core failed: {e}"
                            );
                        }
                    }
                }

                let mut runtime = WorkerRuntime::build(&config);
                let (executor, queue) = executor_pair();
                let (stop_tx, stop_rx) = oneshot::channel();
                let host = ServiceHost::new(executor.clone(), Some(stop_tx));
                info!(group = group_id.value(), "managed service host started");

                if ready_tx.send((host.clone(), executor)).is_err() {
                    return;
                }

                runtime.block_on(queue.run(stop_rx));

                // The run loop exited; dropping the only strong reference
                // destroys the host (and its services) on this thread.
                drop(host);
                info!(group = group_id.value(), "managed service host stopped");
                let _ = lifetime_tx.send(());
            })
            .expect("failed to spawn worker thread");

        let (host, executor) = match ready_rx.recv() {
            Ok(handshake) => handshake,
            Err(_) => {
                // The thread died before signalling readiness.
                let _ = join.join();
                return Err(FrameworkError::disposed::<ServiceHost>());
            }
        };

        let target = ExecutorContext::new(&host, executor.clone());
        drop(host);
        let proxy = ServiceHostProxy::new(DispatchContext::new(source, target));

        self.join = Some(join);
        self.started = Some(StartedState { proxy });
        Ok(ManagedThreadRecord {
            lifetime: lifetime_rx,
        })
    }

    /// Requests shutdown and joins the worker thread.
    ///
    /// Returns `false` when the host was never started. A host whose run
    /// loop already exited is still joined.
    pub fn try_shutdown(&mut self) -> bool {
        let Some(state) = self.started.take() else {
            return false;
        };

        debug!(group = self.thread_group_id.value(), "stopping worker thread");
        if !state.proxy.try_request_shutdown() {
            debug!(
                group = self.thread_group_id.value(),
                "worker run loop already exited"
            );
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(
                    group = self.thread_group_id.value(),
                    "worker thread panicked during shutdown"
                );
            }
        }
        true
    }
}

impl Drop for ManagedThreadHost {
    fn drop(&mut self) {
        if self.started.is_some() {
            warn!(
                group = self.thread_group_id.value(),
                "managed thread host dropped without explicit shutdown, joining"
            );
            self.try_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::host::CooperativeThreadHost;
    use crate::registry::ServiceLaunchPriority;
    use crate::service::ProcessResult;

    use super::*;

    fn managed_host(
        main: &CooperativeThreadHost,
        group: u32,
    ) -> (ManagedThreadHost, ManagedThreadRecord) {
        let mut host = ManagedThreadHost::new(
            ServiceThreadGroupId::new(group),
            RuntimeConfig::default(),
        );
        let record = host.start(main.executor_context()).unwrap();
        (host, record)
    }

    #[test]
    fn test_start_and_shutdown_roundtrip() {
        let main = CooperativeThreadHost::new();
        let (mut host, mut record) = managed_host(&main, 1);

        assert!(host.proxy().is_some());
        assert!(!record.is_finished());
        assert!(host.try_shutdown());
        assert!(record.is_finished());

        // A second shutdown is a no-op.
        assert!(!host.try_shutdown());
    }

    #[test]
    fn test_double_start_rejected() {
        let main = CooperativeThreadHost::new();
        let (mut host, _record) = managed_host(&main, 1);
        let err = host.start(main.executor_context()).unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidArgument(_)));
        host.try_shutdown();
    }

    #[test]
    fn test_services_run_on_worker_thread() {
        use crate::host::tests::{record, Probe, RecordingFactory, RecordingService};

        let mut main = CooperativeThreadHost::new();
        let (mut host, _record) = managed_host(&main, 1);
        let proxy = host.proxy().unwrap().clone();
        let probe = Probe::default();

        let services = vec![record("worker-svc", {
            let probe = probe.clone();
            RecordingFactory::for_service(move || {
                RecordingService::succeeding("worker-svc", probe.clone())
            })
        })];

        let start = {
            let proxy = proxy.clone();
            async move {
                proxy
                    .try_start_services_async(services, ServiceLaunchPriority::new(100))
                    .await
            }
        };
        main.run_until(start).unwrap();
        assert_eq!(probe.events(), ["worker-svc:init"]);

        let shutdown = {
            let proxy = proxy.clone();
            async move {
                proxy
                    .try_shutdown_services_async(ServiceLaunchPriority::new(100))
                    .await
            }
        };
        let errors = main.run_until(shutdown).unwrap();
        assert!(errors.is_empty());
        assert_eq!(probe.events()[1..], ["worker-svc:shutdown"]);

        host.try_shutdown();
    }

    #[test]
    fn test_dead_host_proxy_behaviour() {
        let mut main = CooperativeThreadHost::new();
        let (mut host, _record) = managed_host(&main, 1);
        let proxy = host.proxy().unwrap().clone();

        host.try_shutdown();
        assert!(!proxy.is_target_alive());

        let start = {
            let proxy = proxy.clone();
            async move {
                proxy
                    .try_start_services_async(Vec::new(), ServiceLaunchPriority::new(10))
                    .await
            }
        };
        let err = main.run_until(start).unwrap_err();
        assert!(matches!(err, FrameworkError::ServiceDisposed(_)));

        assert!(!proxy.try_request_shutdown());
        let acked = {
            let proxy = proxy.clone();
            async move { proxy.try_request_shutdown_async().await }
        };
        assert!(!main.run_until(acked));
    }

    #[test]
    fn test_shutdown_request_via_proxy_stops_run_loop() {
        let mut main = CooperativeThreadHost::new();
        let (mut host, mut record) = managed_host(&main, 1);
        let proxy = host.proxy().unwrap().clone();

        let acked = {
            let proxy = proxy.clone();
            async move { proxy.try_request_shutdown_async().await }
        };
        assert!(main.run_until(acked));

        // The run loop should wind down shortly after the request.
        for _ in 0..100 {
            if record.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(record.is_finished());
        assert!(host.try_shutdown());

        // Keep the main host exercised so its queue is drained.
        assert_eq!(main.update(), ProcessResult::NoSleepLimit);
    }
}
