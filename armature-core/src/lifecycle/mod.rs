//! Top-level orchestration across thread groups and priorities.
//!
//! The [`LifecycleManager`] partitions registrations by priority (highest
//! first) and thread group, starts each bucket sequentially (spawning
//! worker threads on demand), and rolls everything back in reverse order if
//! any step fails. The orchestration chains run on the main host's pump, so
//! the application drives them with [`update`](LifecycleManager::update) /
//! [`poll`](LifecycleManager::poll) or [`run_until`](LifecycleManager::run_until).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use tracing::{error, info, warn};

use crate::aggregate::AggregateError;
use crate::config::LifecycleManagerConfig;
use crate::dispatch::{ExecutorContext, LifeTracker};
use crate::host::{
    CooperativeThreadHost, ManagedThreadHost, ManagedThreadRecord, ServiceHostProxy,
};
use crate::registry::{ServiceLaunchPriority, ServiceRegistrationRecord, ServiceThreadGroupId};
use crate::service::{ProcessResult, StartServiceRecord};
use crate::FrameworkError;

/// Cooperative cancellation for lifecycle chains. Cheap to clone; checked
/// at every sequencing point.
#[derive(Clone, Default)]
pub struct StopSource {
    flag: Arc<AtomicBool>,
}

impl StopSource {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            flag: self.flag.clone(),
        }
    }
}

/// Read side of a [`StopSource`].
#[derive(Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// An in-flight lifecycle operation running on the main host's pump.
///
/// Resolve it by pumping the manager: [`LifecycleManager::run_until`], or
/// [`try_take`](PendingLifecycleOp::try_take) from the application's own
/// update loop.
pub struct PendingLifecycleOp<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingLifecycleOp<T> {
    /// The result, once the operation has completed. Keeps returning `None`
    /// while in flight.
    pub fn try_take(&mut self) -> Option<T> {
        self.rx.try_recv().ok().flatten()
    }
}

/// One successfully started (priority, thread group) bucket, tracked for
/// reverse-order shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedPriorityRecord {
    pub priority: ServiceLaunchPriority,
    pub thread_group_id: ServiceThreadGroupId,
}

#[derive(Default)]
struct LifecycleState {
    registrations: Vec<ServiceRegistrationRecord>,
    thread_hosts: BTreeMap<ServiceThreadGroupId, ManagedThreadHost>,
    thread_records: Vec<(ServiceThreadGroupId, ManagedThreadRecord)>,
    started: Vec<StartedPriorityRecord>,
}

/// Orchestrates service startup and shutdown across all thread groups.
pub struct LifecycleManager {
    config: LifecycleManagerConfig,
    main_host: CooperativeThreadHost,
    state: Rc<RefCell<LifecycleState>>,
    stop: StopSource,
}

impl LifecycleManager {
    /// Creates a manager owning the main (cooperative) host on the calling
    /// thread. `registrations` usually come from
    /// [`ServiceRegistry::extract_registrations`](crate::registry::ServiceRegistry::extract_registrations).
    pub fn new(
        config: LifecycleManagerConfig,
        registrations: Vec<ServiceRegistrationRecord>,
    ) -> Self {
        Self {
            config,
            main_host: CooperativeThreadHost::new(),
            state: Rc::new(RefCell::new(LifecycleState {
                registrations,
                ..Default::default()
            })),
            stop: StopSource::default(),
        }
    }

    pub fn config(&self) -> &LifecycleManagerConfig {
        &self.config
    }

    pub fn main_host(&self) -> &CooperativeThreadHost {
        &self.main_host
    }

    pub fn main_host_mut(&mut self) -> &mut CooperativeThreadHost {
        &mut self.main_host
    }

    /// Buckets started so far, in start order.
    pub fn started_priorities(&self) -> Vec<StartedPriorityRecord> {
        self.state.borrow().started.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.token()
    }

    /// One main-loop tick; main thread only.
    pub fn update(&mut self) -> ProcessResult {
        self.main_host.update()
    }

    /// Runs ready main-thread work without blocking; main thread only.
    pub fn poll(&mut self) -> usize {
        self.main_host.poll()
    }

    /// Starts every registered service, highest priority level first.
    ///
    /// Within a priority level the thread-group buckets start sequentially
    /// (ascending group id); worker threads are spawned on first use. On any
    /// failure the already-started buckets are rolled back in reverse order
    /// and the operation resolves to a single aggregate carrying the
    /// original error followed by any rollback errors. The stop token is
    /// honoured between sequencing steps.
    pub fn start_services_async(&mut self) -> PendingLifecycleOp<Result<(), FrameworkError>> {
        let (tx, rx) = oneshot::channel();
        let chain = LifecycleChain {
            state: self.state.clone(),
            token: self.stop.token(),
            main_proxy: self.main_host.proxy().clone(),
            source: self.main_host.executor_context(),
            config: self.config.clone(),
        };
        self.main_host.spawn_local(async move {
            let _ = tx.send(chain.run().await);
        });
        PendingLifecycleOp { rx }
    }

    /// Shuts down every started bucket in reverse start order, then stops
    /// and joins all worker threads. Never short-circuits; resolves to the
    /// flat list of collected errors.
    pub fn shutdown_services_async(&mut self) -> PendingLifecycleOp<Vec<FrameworkError>> {
        let (tx, rx) = oneshot::channel();
        let chain = LifecycleChain {
            state: self.state.clone(),
            token: self.stop.token(),
            main_proxy: self.main_host.proxy().clone(),
            source: self.main_host.executor_context(),
            config: self.config.clone(),
        };
        self.main_host.spawn_local(async move {
            let _ = tx.send(chain.shutdown().await);
        });
        PendingLifecycleOp { rx }
    }

    /// Pumps the main host until `op` resolves. Parks between polls and is
    /// woken by posted work; intended for startup/shutdown phases and tests.
    pub fn run_until<T: 'static>(&mut self, mut op: PendingLifecycleOp<T>) -> T {
        let thread = std::thread::current();
        self.main_host
            .set_wake_callback(Some(Box::new(move || thread.unpark())));
        let result = loop {
            self.main_host.poll();
            match op.rx.try_recv() {
                Ok(Some(value)) => break value,
                Ok(None) => std::thread::park_timeout(Duration::from_millis(10)),
                Err(_) => panic!("lifecycle operation dropped before completing"),
            }
        };
        self.main_host.set_wake_callback(None);
        result
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.stop.request_stop();
        // Worker hosts left running are shut down and joined by their own
        // drop handlers (with a warning); nothing to sequence here anymore.
    }
}

/// One orchestration run over the shared lifecycle state.
struct LifecycleChain {
    state: Rc<RefCell<LifecycleState>>,
    token: StopToken,
    main_proxy: ServiceHostProxy,
    source: ExecutorContext<LifeTracker>,
    config: LifecycleManagerConfig,
}

type PriorityBuckets =
    BTreeMap<ServiceLaunchPriority, BTreeMap<ServiceThreadGroupId, Vec<ServiceRegistrationRecord>>>;

impl LifecycleChain {
    async fn run(self) -> Result<(), FrameworkError> {
        let registrations = mem::take(&mut self.state.borrow_mut().registrations);
        if registrations.is_empty() {
            info!("no services registered, startup is a no-op");
            return Ok(());
        }

        let mut buckets: PriorityBuckets = BTreeMap::new();
        for registration in registrations {
            buckets
                .entry(registration.priority)
                .or_default()
                .entry(registration.thread_group_id)
                .or_default()
                .push(registration);
        }

        match self.start_buckets(buckets).await {
            Ok(()) => Ok(()),
            Err(startup_error) => {
                warn!(error = %startup_error, "startup failed, rolling back started services");
                let mut errors = vec![startup_error];
                errors.extend(self.shutdown().await);
                Err(AggregateError::new("service startup failed", errors).into())
            }
        }
    }

    async fn start_buckets(&self, buckets: PriorityBuckets) -> Result<(), FrameworkError> {
        // Highest priority first; groups within a level in ascending id
        // order, sequentially.
        for (priority, groups) in buckets.into_iter().rev() {
            for (group_id, registrations) in groups {
                if self.token.is_stop_requested() {
                    return Err(FrameworkError::Cancelled);
                }

                let services: Vec<StartServiceRecord> = registrations
                    .into_iter()
                    .map(|registration| {
                        let name = registration
                            .factory
                            .supported_interfaces()
                            .first()
                            .map(|descriptor| descriptor.name.to_string())
                            .unwrap_or_else(|| "unknown-service".to_string());
                        StartServiceRecord::new(name, registration.factory)
                    })
                    .collect();

                info!(
                    priority = priority.value(),
                    group = group_id.value(),
                    count = services.len(),
                    "starting services"
                );

                let proxy = if group_id.is_main() {
                    self.main_proxy.clone()
                } else {
                    self.ensure_thread_host(group_id)?
                };
                proxy.try_start_services_async(services, priority).await?;

                if !self.token.is_stop_requested() {
                    self.state.borrow_mut().started.push(StartedPriorityRecord {
                        priority,
                        thread_group_id: group_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the proxy for `group_id`, spawning the worker on first use.
    fn ensure_thread_host(
        &self,
        group_id: ServiceThreadGroupId,
    ) -> Result<ServiceHostProxy, FrameworkError> {
        let mut state = self.state.borrow_mut();
        if let Some(host) = state.thread_hosts.get(&group_id) {
            return host.proxy().cloned().ok_or_else(|| {
                FrameworkError::ServiceProvider(format!(
                    "worker thread for group {group_id} is not running"
                ))
            });
        }

        let mut host = ManagedThreadHost::new(group_id, self.config.runtime.clone());
        let record = host.start(self.source.clone())?;
        let proxy = host.proxy().cloned().ok_or_else(|| {
            FrameworkError::ServiceProvider(format!(
                "worker thread for group {group_id} failed to expose a host"
            ))
        })?;
        state.thread_hosts.insert(group_id, host);
        state.thread_records.push((group_id, record));
        Ok(proxy)
    }

    async fn shutdown(&self) -> Vec<FrameworkError> {
        let started: Vec<StartedPriorityRecord> = {
            let mut state = self.state.borrow_mut();
            state.started.drain(..).collect()
        };

        // Shutdown keeps going even when stop was requested: services must
        // not be left half-alive.
        let mut errors = Vec::new();
        for record in started.iter().rev() {
            let proxy = if record.thread_group_id.is_main() {
                Some(self.main_proxy.clone())
            } else {
                self.state
                    .borrow()
                    .thread_hosts
                    .get(&record.thread_group_id)
                    .and_then(|host| host.proxy().cloned())
            };
            let Some(proxy) = proxy else {
                continue;
            };

            info!(
                priority = record.priority.value(),
                group = record.thread_group_id.value(),
                "shutting down services"
            );
            match proxy.try_shutdown_services_async(record.priority).await {
                Ok(service_errors) => errors.extend(service_errors),
                Err(e) => {
                    error!(error = %e, "shutdown dispatch failed");
                    errors.push(e);
                }
            }
        }

        // Stop and join every worker thread.
        let hosts = mem::take(&mut self.state.borrow_mut().thread_hosts);
        for (group_id, mut host) in hosts {
            info!(group = group_id.value(), "shutting down worker thread");
            host.try_shutdown();
        }
        self.state.borrow_mut().thread_records.clear();

        errors
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::host::tests::{record, Probe, RecordingFactory, RecordingService};
    use crate::service::{
        InterfaceDescriptor, InterfaceHandle, Service, ServiceCreateInfo, ServiceFactory,
        ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
    };
    use crate::AnyResult;

    use super::*;

    fn priority(value: u32) -> ServiceLaunchPriority {
        ServiceLaunchPriority::new(value)
    }

    fn registration(
        name: &'static str,
        factory: RecordingFactory,
        level: u32,
        group: ServiceThreadGroupId,
    ) -> ServiceRegistrationRecord {
        let record = record(name, factory);
        ServiceRegistrationRecord::new(record.factory, priority(level), group)
    }

    fn recording_registration(
        name: &'static str,
        probe: &Probe,
        level: u32,
        group: ServiceThreadGroupId,
    ) -> ServiceRegistrationRecord {
        let probe = probe.clone();
        registration(
            name,
            RecordingFactory::for_service(move || RecordingService::succeeding(name, probe.clone())),
            level,
            group,
        )
    }

    #[test]
    fn test_three_service_happy_path() {
        let probe = Probe::default();
        let registrations = vec![
            recording_registration("a", &probe, 300, ServiceThreadGroupId::MAIN),
            recording_registration("b", &probe, 200, ServiceThreadGroupId::MAIN),
            recording_registration("c", &probe, 100, ServiceThreadGroupId::MAIN),
        ];

        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), registrations);
        let start = manager.start_services_async();
        manager.run_until(start).unwrap();

        assert_eq!(probe.events(), ["a:init", "b:init", "c:init"]);
        assert_eq!(
            manager
                .started_priorities()
                .iter()
                .map(|r| r.priority.value())
                .collect::<Vec<_>>(),
            [300, 200, 100]
        );

        // One tick processes every service in registration order.
        assert_eq!(manager.update(), ProcessResult::NoSleepLimit);
        assert_eq!(probe.events()[3..], ["a:process", "b:process", "c:process"]);

        let shutdown = manager.shutdown_services_async();
        let errors = manager.run_until(shutdown);
        assert!(errors.is_empty());
        assert_eq!(probe.events()[6..], ["c:shutdown", "b:shutdown", "a:shutdown"]);
        assert!(manager.started_priorities().is_empty());

        // Exactly one init and one shutdown per service.
        for name in ["a", "b", "c"] {
            assert_eq!(probe.count_of(&format!("{name}:init")), 1);
            assert_eq!(probe.count_of(&format!("{name}:shutdown")), 1);
        }
    }

    #[test]
    fn test_startup_failure_rolls_back_started_levels() {
        let probe = Probe::default();
        let registrations = vec![
            recording_registration("a", &probe, 300, ServiceThreadGroupId::MAIN),
            registration(
                "b",
                {
                    let probe = probe.clone();
                    RecordingFactory::for_service(move || RecordingService {
                        init: Err("boom".into()),
                        ..RecordingService::succeeding("b", probe.clone())
                    })
                },
                200,
                ServiceThreadGroupId::MAIN,
            ),
        ];

        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), registrations);
        let start = manager.start_services_async();
        let err = manager.run_until(start).unwrap_err();

        let FrameworkError::Aggregate(aggregate) = err else {
            panic!("expected aggregate, got {err:?}");
        };
        let flat = aggregate.flatten();
        assert_eq!(flat.len(), 1);
        assert!(flat.inner()[0].to_string().contains("boom"));

        // The failed service never shut down; the started level was rolled
        // back exactly once.
        assert_eq!(probe.events(), ["a:init", "b:init", "a:shutdown"]);
        assert!(manager.started_priorities().is_empty());
    }

    trait TideGauge: Send + Sync {
        fn level(&self) -> i64;
    }

    struct FixedTideGauge;

    #[async_trait]
    impl Service for FixedTideGauge {
        async fn init_async(&self, _: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
            Ok(ServiceInitResult::Success)
        }

        async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
            Ok(ServiceShutdownResult::Success)
        }
    }

    impl TideGauge for FixedTideGauge {
        fn level(&self) -> i64 {
            7
        }
    }

    struct TideGaugeFactory;

    impl ServiceFactory for TideGaugeFactory {
        fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
            vec![InterfaceDescriptor::of::<dyn TideGauge>()]
        }

        fn create(
            &self,
            _interface: InterfaceDescriptor,
            _create_info: &ServiceCreateInfo,
        ) -> AnyResult<ServiceInstanceInfo> {
            let service = Arc::new(FixedTideGauge);
            Ok(ServiceInstanceInfo::new(
                service.clone(),
                vec![InterfaceHandle::new::<dyn TideGauge>(service)],
            ))
        }
    }

    trait TideConsumer: Send + Sync {}

    struct GaugeReader {
        probe: Probe,
    }

    #[async_trait]
    impl Service for GaugeReader {
        async fn init_async(&self, create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
            // The higher-priority dependency must already be resolvable.
            let gauge = create_info.provider().get_service::<dyn TideGauge>()?;
            self.probe.record(format!("observed:{}", gauge.level()));
            Ok(ServiceInitResult::Success)
        }

        async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
            Ok(ServiceShutdownResult::Success)
        }
    }

    impl TideConsumer for GaugeReader {}

    struct GaugeReaderFactory {
        probe: Probe,
    }

    impl ServiceFactory for GaugeReaderFactory {
        fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
            vec![InterfaceDescriptor::of::<dyn TideConsumer>()]
        }

        fn create(
            &self,
            _interface: InterfaceDescriptor,
            _create_info: &ServiceCreateInfo,
        ) -> AnyResult<ServiceInstanceInfo> {
            let service = Arc::new(GaugeReader {
                probe: self.probe.clone(),
            });
            Ok(ServiceInstanceInfo::new(
                service.clone(),
                vec![InterfaceHandle::new::<dyn TideConsumer>(service)],
            ))
        }
    }

    #[test]
    fn test_lower_priority_service_sees_higher_priority_dependency() {
        let probe = Probe::default();
        let registrations = vec![
            ServiceRegistrationRecord::new(
                Box::new(TideGaugeFactory),
                priority(1000),
                ServiceThreadGroupId::MAIN,
            ),
            ServiceRegistrationRecord::new(
                Box::new(GaugeReaderFactory {
                    probe: probe.clone(),
                }),
                priority(100),
                ServiceThreadGroupId::MAIN,
            ),
        ];

        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), registrations);
        let start = manager.start_services_async();
        manager.run_until(start).unwrap();
        assert_eq!(probe.events(), ["observed:7"]);

        let shutdown = manager.shutdown_services_async();
        assert!(manager.run_until(shutdown).is_empty());
    }

    #[test]
    fn test_worker_group_started_and_torn_down() {
        let probe = Probe::default();
        let worker_group = ServiceThreadGroupId::new(1);
        let registrations = vec![
            recording_registration("main-svc", &probe, 300, ServiceThreadGroupId::MAIN),
            recording_registration("worker-svc", &probe, 200, worker_group),
        ];

        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), registrations);
        let start = manager.start_services_async();
        manager.run_until(start).unwrap();

        assert_eq!(probe.events(), ["main-svc:init", "worker-svc:init"]);
        assert_eq!(
            manager.started_priorities(),
            [
                StartedPriorityRecord {
                    priority: priority(300),
                    thread_group_id: ServiceThreadGroupId::MAIN
                },
                StartedPriorityRecord {
                    priority: priority(200),
                    thread_group_id: worker_group
                },
            ]
        );

        let shutdown = manager.shutdown_services_async();
        let errors = manager.run_until(shutdown);
        assert!(errors.is_empty());

        // Reverse start order, then the worker thread is gone.
        assert_eq!(
            probe.events()[2..],
            ["worker-svc:shutdown", "main-svc:shutdown"]
        );
        assert!(manager.state.borrow().thread_hosts.is_empty());
    }

    #[test]
    fn test_stop_requested_before_start_cancels() {
        let probe = Probe::default();
        let registrations =
            vec![recording_registration("a", &probe, 100, ServiceThreadGroupId::MAIN)];

        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), registrations);
        manager.request_stop();
        let start = manager.start_services_async();
        let err = manager.run_until(start).unwrap_err();

        let FrameworkError::Aggregate(aggregate) = err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert!(matches!(
            aggregate.base_error(),
            Some(FrameworkError::Cancelled)
        ));
        assert!(probe.events().is_empty());
        assert!(manager.started_priorities().is_empty());
    }

    #[test]
    fn test_shutdown_without_startup_is_empty() {
        let mut manager = LifecycleManager::new(LifecycleManagerConfig::default(), Vec::new());
        let start = manager.start_services_async();
        manager.run_until(start).unwrap();
        let shutdown = manager.shutdown_services_async();
        assert!(manager.run_until(shutdown).is_empty());
    }
}
