//! Per-thread service containers.
//!
//! [`ServiceHost`] is the shared core of both host variants: it owns the
//! provider, the executor handle, and the startup/shutdown machinery, and is
//! bound to the thread that constructed it. The variants differ only in how
//! their executor makes progress:
//!
//! - [`CooperativeThreadHost`] has no thread of its own; the application's
//!   main loop pumps it through `poll`/`update`.
//! - [`ManagedThreadHost`] dedicates an OS thread whose run loop blocks on
//!   the executor queue until shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use futures_channel::oneshot;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::aggregate::AggregateError;
use crate::dispatch::ExecutorContext;
use crate::executor::Executor;
use crate::provider::{ServiceProvider, ServiceProviderProxy};
use crate::registry::ServiceLaunchPriority;
use crate::service::{
    ProcessResult, ServiceCreateInfo, ServiceInitResult, ServiceInstanceInfo,
    ServiceShutdownResult, StartServiceRecord,
};
use crate::FrameworkError;

mod cooperative;
mod managed;
mod proxy;

pub use cooperative::CooperativeThreadHost;
pub use managed::{ManagedThreadHost, ManagedThreadRecord};
pub use proxy::ServiceHostProxy;

struct ServiceInitRecord {
    service_name: String,
    info: ServiceInstanceInfo,
    outcome: Option<Result<(), FrameworkError>>,
}

/// The per-thread service container shared by both host variants.
///
/// All synchronous accessors are owner-thread-only; other threads interact
/// through a [`ServiceHostProxy`] that marshals onto this host's executor.
pub struct ServiceHost {
    provider: Arc<ServiceProvider>,
    executor: Executor,
    owner: ThreadId,
    keepalive: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_requested: AtomicBool,
}

impl ServiceHost {
    /// Binds a new host to the calling thread. `keepalive` is the run-loop
    /// stop handle for managed hosts; cooperative hosts pass `None`.
    pub(crate) fn new(executor: Executor, keepalive: Option<oneshot::Sender<()>>) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(ServiceProvider::new()),
            executor,
            owner: thread::current().id(),
            keepalive: Mutex::new(keepalive),
            shutdown_requested: AtomicBool::new(false),
        })
    }

    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// The thread this host (and its provider) is bound to.
    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    /// An [`ExecutorContext`] addressing this host on its own executor.
    pub fn executor_context(self: &Arc<Self>) -> ExecutorContext<ServiceHost> {
        ExecutorContext::new(self, self.executor.clone())
    }

    /// Signals the host to stop accepting new work and release its run-loop
    /// keepalive. Does not itself shut down services; the lifecycle manager
    /// sequences that.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if let Some(stop) = self.keepalive.lock().take() {
            let _ = stop.send(());
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Ticks every registered service on the owner thread, folding the
    /// results with [`ProcessResult::merge`].
    pub fn process_services(&self) -> Result<ProcessResult, FrameworkError> {
        let controls = self.provider.get_all_service_controls()?;
        Ok(controls
            .iter()
            .fold(ProcessResult::NoSleepLimit, |acc, service| {
                acc.merge(service.process())
            }))
    }

    /// Starts `services` as one priority group, marshalled onto this host's
    /// executor. See [`start_services_on_owner`](Self::start_services_on_owner)
    /// for the transactional semantics.
    pub fn try_start_services_async(
        self: &Arc<Self>,
        services: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> impl std::future::Future<Output = Result<(), FrameworkError>> {
        let host = self.clone();
        let (tx, rx) = oneshot::channel();
        let accepted = self.executor.post(Box::new(move || {
            Box::pin(async move {
                let result = host.start_services_on_owner(services, priority).await;
                let _ = tx.send(result);
            })
        }));
        async move {
            if !accepted {
                return Err(FrameworkError::disposed::<ServiceHost>());
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(FrameworkError::Cancelled),
            }
        }
    }

    /// Shuts down the priority group at `priority`, marshalled onto this
    /// host's executor. Per-service failures are returned in bulk, not
    /// raised.
    pub fn try_shutdown_services_async(
        self: &Arc<Self>,
        priority: ServiceLaunchPriority,
    ) -> impl std::future::Future<Output = Vec<FrameworkError>> {
        let host = self.clone();
        let (tx, rx) = oneshot::channel();
        let accepted = self.executor.post(Box::new(move || {
            Box::pin(async move {
                let errors = host.shutdown_services_on_owner(priority).await;
                let _ = tx.send(errors);
            })
        }));
        async move {
            if !accepted {
                return vec![FrameworkError::disposed::<ServiceHost>()];
            }
            rx.await.unwrap_or_else(|_| vec![FrameworkError::Cancelled])
        }
    }

    /// The transactional startup algorithm for one priority group. Runs on
    /// the owner thread.
    ///
    /// Phase A constructs every service (a failure aborts immediately, since
    /// no service has been initialized yet). Phase B awaits `init_async` for
    /// every constructed service, capturing failures without
    /// short-circuiting. Phase C either registers the whole group with the
    /// provider, or rolls back every successfully initialized service in
    /// reverse order and raises a single aggregate containing the init
    /// failures followed by any rollback failures. On any failure the
    /// provider proxy handed to the constructing services is severed.
    pub(crate) async fn start_services_on_owner(
        &self,
        services: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> Result<(), FrameworkError> {
        if services.is_empty() {
            warn!(
                priority = priority.value(),
                "try_start_services_async called with an empty service list"
            );
            return Ok(());
        }

        for record in &services {
            if record.factory.supported_interfaces().is_empty() {
                return Err(FrameworkError::InvalidServiceFactory(format!(
                    "factory for service '{}' reports no supported interfaces",
                    record.service_name
                )));
            }
        }

        let proxy = Arc::new(ServiceProviderProxy::new(self.provider.clone()));
        let create_info = ServiceCreateInfo::new(proxy.clone());

        let result = self
            .run_startup_phases(services, priority, &create_info)
            .await;
        if result.is_err() {
            proxy.clear();
        }
        result
    }

    async fn run_startup_phases(
        &self,
        services: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
        create_info: &ServiceCreateInfo,
    ) -> Result<(), FrameworkError> {
        // Phase A: construct all instances.
        let mut records = Vec::with_capacity(services.len());
        for record in &services {
            info!(service = %record.service_name, "creating service");
            let interfaces = record.factory.supported_interfaces();
            let info = record
                .factory
                .create(interfaces[0], create_info)
                .map_err(|e| {
                    FrameworkError::InvalidServiceFactory(format!(
                        "factory for service '{}' failed: {e}",
                        record.service_name
                    ))
                })?;
            if info.interfaces.is_empty() {
                return Err(FrameworkError::InvalidServiceFactory(format!(
                    "factory for service '{}' produced an instance with no interfaces",
                    record.service_name
                )));
            }
            records.push(ServiceInitRecord {
                service_name: record.service_name.clone(),
                info,
                outcome: None,
            });
        }

        // Phase B: initialize everything; capture failures per service.
        for record in &mut records {
            info!(service = %record.service_name, "initializing service");
            let outcome = match record.info.service.init_async(create_info).await {
                Ok(ServiceInitResult::Success) => Ok(()),
                Ok(ServiceInitResult::Failure(reason)) => Err(FrameworkError::ServiceInitFailed(
                    record.service_name.clone(),
                    reason,
                )),
                Err(e) => Err(FrameworkError::ServiceInitFailed(
                    record.service_name.clone(),
                    e.to_string(),
                )),
            };
            if let Err(e) = &outcome {
                error!(service = %record.service_name, error = %e, "service initialization failed");
            }
            record.outcome = Some(outcome);
        }

        // Phase C: commit, or roll back in reverse order.
        let mut failures = Vec::new();
        let mut initialized = Vec::new();
        for record in &mut records {
            match record.outcome.take() {
                Some(Err(e)) => failures.push(e),
                Some(Ok(())) => {
                    initialized.push((record.service_name.clone(), record.info.service.clone()))
                }
                None => {}
            }
        }

        if !failures.is_empty() {
            warn!(
                count = initialized.len(),
                "rolling back successfully initialized services"
            );
            for (service_name, service) in initialized.iter().rev() {
                match service.shutdown_async().await {
                    Ok(ServiceShutdownResult::Success) => {}
                    Ok(ServiceShutdownResult::Failure(reason)) => {
                        warn!(service = %service_name, reason = %reason, "rollback shutdown returned non-success");
                    }
                    Err(e) => {
                        error!(service = %service_name, error = %e, "rollback shutdown failed");
                        failures.push(FrameworkError::ServiceShutdownFailed(
                            service_name.clone(),
                            e.to_string(),
                        ));
                    }
                }
            }
            return Err(AggregateError::new("service initialization failed", failures).into());
        }

        let count = records.len();
        let infos = records.into_iter().map(|record| record.info).collect();
        self.provider.register_priority_group(priority, infos)?;
        info!(
            count,
            priority = priority.value(),
            "services initialized and registered"
        );
        Ok(())
    }

    /// The shutdown algorithm for one priority level. Runs on the owner
    /// thread; never fails for per-service errors.
    pub(crate) async fn shutdown_services_on_owner(
        &self,
        priority: ServiceLaunchPriority,
    ) -> Vec<FrameworkError> {
        let services = match self.provider.unregister_priority_group(priority) {
            Ok(Some(services)) => services,
            Ok(None) => return Vec::new(),
            Err(e) => return vec![e],
        };

        info!(
            count = services.len(),
            priority = priority.value(),
            "shutting down services"
        );

        let mut failures = Vec::new();
        for info in services.iter().rev() {
            let service_name = info.display_name();
            match info.service.shutdown_async().await {
                Ok(ServiceShutdownResult::Success) => {}
                Ok(ServiceShutdownResult::Failure(reason)) => {
                    warn!(service = service_name, reason = %reason, "service shutdown returned non-success");
                }
                Err(e) => {
                    error!(service = service_name, error = %e, "service shutdown failed");
                    failures.push(FrameworkError::ServiceShutdownFailed(
                        service_name.to_string(),
                        e.to_string(),
                    ));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::service::{
        InterfaceDescriptor, InterfaceHandle, Service, ServiceFactory, ServiceInstanceInfo,
    };
    use crate::AnyResult;

    use super::*;

    /// Shared event log recording lifecycle calls in order.
    #[derive(Clone, Default)]
    pub(crate) struct Probe {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        pub(crate) fn record(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        pub(crate) fn count_of(&self, event: &str) -> usize {
            self.events.lock().iter().filter(|e| *e == event).count()
        }
    }

    pub(crate) trait Recording: Send + Sync {}

    pub(crate) struct RecordingService {
        pub(crate) name: &'static str,
        pub(crate) probe: Probe,
        pub(crate) init: Result<ServiceInitResult, String>,
        pub(crate) shutdown: Result<ServiceShutdownResult, String>,
        pub(crate) process_result: ProcessResult,
    }

    impl RecordingService {
        pub(crate) fn succeeding(name: &'static str, probe: Probe) -> Self {
            Self {
                name,
                probe,
                init: Ok(ServiceInitResult::Success),
                shutdown: Ok(ServiceShutdownResult::Success),
                process_result: ProcessResult::NoSleepLimit,
            }
        }
    }

    #[async_trait]
    impl Service for RecordingService {
        async fn init_async(&self, _: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
            self.probe.record(format!("{}:init", self.name));
            match &self.init {
                Ok(result) => Ok(result.clone()),
                Err(message) => bail_into!("{message}"),
            }
        }

        async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
            self.probe.record(format!("{}:shutdown", self.name));
            match &self.shutdown {
                Ok(result) => Ok(result.clone()),
                Err(message) => bail_into!("{message}"),
            }
        }

        fn process(&self) -> ProcessResult {
            self.probe.record(format!("{}:process", self.name));
            self.process_result
        }
    }

    impl Recording for RecordingService {}

    type BuildFn =
        Box<dyn Fn(&ServiceCreateInfo) -> AnyResult<ServiceInstanceInfo> + Send + 'static>;

    /// Factory driven by a closure; the closure's type keeps registration
    /// identities distinct where needed.
    pub(crate) struct RecordingFactory {
        build: BuildFn,
    }

    impl RecordingFactory {
        pub(crate) fn new(
            build: impl Fn(&ServiceCreateInfo) -> AnyResult<ServiceInstanceInfo> + Send + 'static,
        ) -> Self {
            Self {
                build: Box::new(build),
            }
        }

        pub(crate) fn for_service(
            make: impl Fn() -> RecordingService + Send + 'static,
        ) -> Self {
            Self::new(move |_| {
                let service = Arc::new(make());
                Ok(ServiceInstanceInfo::new(
                    service.clone(),
                    vec![InterfaceHandle::new::<dyn Recording>(service)],
                ))
            })
        }
    }

    impl ServiceFactory for RecordingFactory {
        fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
            vec![InterfaceDescriptor::of::<dyn Recording>()]
        }

        fn create(
            &self,
            _interface: InterfaceDescriptor,
            create_info: &ServiceCreateInfo,
        ) -> AnyResult<ServiceInstanceInfo> {
            (self.build)(create_info)
        }
    }

    pub(crate) fn record(
        name: &'static str,
        factory: RecordingFactory,
    ) -> StartServiceRecord {
        StartServiceRecord::new(name, Box::new(factory))
    }

    fn priority(value: u32) -> ServiceLaunchPriority {
        ServiceLaunchPriority::new(value)
    }

    #[test]
    fn test_start_initializes_in_order_and_registers() {
        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();

        let services = vec![
            record("s1", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("s1", probe.clone())
                })
            }),
            record("s2", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("s2", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        host.run_until(start).unwrap();

        assert_eq!(probe.events(), ["s1:init", "s2:init"]);
        let result = host.service_host().process_services().unwrap();
        assert_eq!(result, ProcessResult::NoSleepLimit);
        assert_eq!(probe.events()[2..], ["s1:process", "s2:process"]);
    }

    #[test]
    fn test_empty_service_list_is_a_noop() {
        let mut host = CooperativeThreadHost::new();
        let start = host
            .service_host()
            .try_start_services_async(Vec::new(), priority(100));
        host.run_until(start).unwrap();
        assert!(host
            .service_host()
            .provider()
            .get_all_service_controls()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mid_group_init_failure_rolls_back_in_reverse() {
        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();

        let services = vec![
            record("s1", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("s1", probe.clone())
                })
            }),
            record("s2", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    init: Err("boom".into()),
                    ..RecordingService::succeeding("s2", probe.clone())
                })
            }),
            record("s3", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("s3", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        let err = host.run_until(start).unwrap_err();

        let FrameworkError::Aggregate(aggregate) = err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert_eq!(aggregate.len(), 1);
        assert!(aggregate.inner()[0].to_string().contains("boom"));

        // All three were initialized (phase B does not short-circuit); the
        // two successes were rolled back in reverse order.
        assert_eq!(
            probe.events(),
            ["s1:init", "s2:init", "s3:init", "s3:shutdown", "s1:shutdown"]
        );
        assert!(host
            .service_host()
            .provider()
            .get_all_service_controls()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rollback_failures_are_appended_to_aggregate() {
        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();

        let services = vec![
            record("s1", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    shutdown: Err("shutdown-bang".into()),
                    ..RecordingService::succeeding("s1", probe.clone())
                })
            }),
            record("s2", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    init: Ok(ServiceInitResult::Failure("init-said-no".into())),
                    ..RecordingService::succeeding("s2", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        let err = host.run_until(start).unwrap_err();

        let FrameworkError::Aggregate(aggregate) = err else {
            panic!("expected aggregate, got {err:?}");
        };
        // Init failures first, rollback failures after.
        assert_eq!(aggregate.len(), 2);
        assert!(matches!(
            aggregate.inner()[0],
            FrameworkError::ServiceInitFailed(..)
        ));
        assert!(matches!(
            aggregate.inner()[1],
            FrameworkError::ServiceShutdownFailed(..)
        ));
    }

    #[test]
    fn test_failed_start_severs_provider_proxy() {
        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();
        let captured: Arc<Mutex<Option<Arc<ServiceProviderProxy>>>> =
            Arc::new(Mutex::new(None));

        let services = vec![
            record("keeper", {
                let probe = probe.clone();
                let captured = captured.clone();
                RecordingFactory::new(move |create_info| {
                    *captured.lock() = Some(create_info.provider_arc());
                    let service = Arc::new(RecordingService::succeeding("keeper", probe.clone()));
                    Ok(ServiceInstanceInfo::new(
                        service.clone(),
                        vec![InterfaceHandle::new::<dyn Recording>(service)],
                    ))
                })
            }),
            record("bad", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    init: Err("nope".into()),
                    ..RecordingService::succeeding("bad", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        host.run_until(start).unwrap_err();

        let proxy = captured.lock().take().unwrap();
        assert!(proxy.is_cleared());
    }

    #[test]
    fn test_shutdown_walks_group_in_reverse_and_collects_errors() {
        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();

        let services = vec![
            record("a", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("a", probe.clone())
                })
            }),
            record("b", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    shutdown: Err("b-failed".into()),
                    ..RecordingService::succeeding("b", probe.clone())
                })
            }),
            record("c", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    shutdown: Ok(ServiceShutdownResult::Failure("ignored".into())),
                    ..RecordingService::succeeding("c", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        host.run_until(start).unwrap();

        let shutdown = host.service_host().try_shutdown_services_async(priority(100));
        let errors = host.run_until(shutdown);

        // Reverse registration order; non-success results are logged, only
        // hard failures are collected.
        assert_eq!(
            probe.events()[3..],
            ["c:shutdown", "b:shutdown", "a:shutdown"]
        );
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], FrameworkError::ServiceShutdownFailed(..)));

        // Shutting down an absent level is a no-op.
        let shutdown = host.service_host().try_shutdown_services_async(priority(100));
        assert!(host.run_until(shutdown).is_empty());
    }

    #[test]
    fn test_process_results_merge_across_services() {
        use std::time::Duration;

        let mut host = CooperativeThreadHost::new();
        let probe = Probe::default();

        let services = vec![
            record("calm", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || {
                    RecordingService::succeeding("calm", probe.clone())
                })
            }),
            record("sleepy", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    process_result: ProcessResult::SleepLimit(Duration::from_millis(50)),
                    ..RecordingService::succeeding("sleepy", probe.clone())
                })
            }),
            record("slower", {
                let probe = probe.clone();
                RecordingFactory::for_service(move || RecordingService {
                    process_result: ProcessResult::SleepLimit(Duration::from_millis(200)),
                    ..RecordingService::succeeding("slower", probe.clone())
                })
            }),
        ];

        let start = host.service_host().try_start_services_async(services, priority(100));
        host.run_until(start).unwrap();

        assert_eq!(
            host.update(),
            ProcessResult::SleepLimit(Duration::from_millis(50))
        );
        assert_eq!(probe.count_of("calm:process"), 1);

        // A quitting service absorbs every sleep hint.
        let quitter = vec![record("quitter", {
            let probe = probe.clone();
            RecordingFactory::for_service(move || RecordingService {
                process_result: ProcessResult::Quit,
                ..RecordingService::succeeding("quitter", probe.clone())
            })
        })];
        let start = host.service_host().try_start_services_async(quitter, priority(50));
        host.run_until(start).unwrap();
        assert_eq!(host.update(), ProcessResult::Quit);
    }
}
