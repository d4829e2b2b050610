//! Heartbeat service: counts process ticks and asks the host loop to sleep
//! between them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use async_trait::async_trait;
use tracing::debug;

use armature_core::service::{
    InterfaceDescriptor, InterfaceHandle, ProcessResult, Service, ServiceCreateInfo,
    ServiceFactory, ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
};
use armature_core::AnyResult;

pub trait HeartbeatService: Send + Sync {
    /// Number of process ticks observed so far.
    fn ticks(&self) -> u64;
}

struct TickingHeartbeatService {
    interval: Duration,
    ticks: AtomicU64,
}

#[async_trait]
impl Service for TickingHeartbeatService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        debug!(interval_ms = self.interval.as_millis() as u64, "heartbeat service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        debug!(ticks = self.ticks(), "heartbeat service stopped");
        Ok(ServiceShutdownResult::Success)
    }

    fn process(&self) -> ProcessResult {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        ProcessResult::SleepLimit(self.interval)
    }
}

impl HeartbeatService for TickingHeartbeatService {
    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

pub struct HeartbeatServiceFactory {
    interval: Duration,
}

impl HeartbeatServiceFactory {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for HeartbeatServiceFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl ServiceFactory for HeartbeatServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn HeartbeatService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn HeartbeatService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(TickingHeartbeatService {
            interval: self.interval,
            ticks: AtomicU64::new(0),
        });
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn HeartbeatService>(service)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use armature_core::host::CooperativeThreadHost;
    use armature_core::registry::ServiceLaunchPriority;
    use armature_core::service::StartServiceRecord;

    use super::*;

    #[test]
    fn test_heartbeat_counts_ticks_and_limits_sleep() {
        let mut host = CooperativeThreadHost::new();
        let interval = Duration::from_millis(40);
        let services = vec![StartServiceRecord::new(
            "heartbeat",
            Box::new(HeartbeatServiceFactory::new(interval)),
        )];
        let start = host
            .service_host()
            .try_start_services_async(services, ServiceLaunchPriority::new(100));
        host.run_until(start).unwrap();

        assert_eq!(host.update(), ProcessResult::SleepLimit(interval));
        assert_eq!(host.update(), ProcessResult::SleepLimit(interval));

        let heartbeat = host
            .service_host()
            .provider()
            .get_service::<dyn HeartbeatService>()
            .unwrap();
        assert_eq!(heartbeat.ticks(), 2);
    }
}
