//! Uptime service: a minimal worker-thread resident that records when it
//! was initialized.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::ensure;
use async_trait::async_trait;
use tracing::info;

use armature_core::service::{
    InterfaceDescriptor, InterfaceHandle, Service, ServiceCreateInfo, ServiceFactory,
    ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
};
use armature_core::AnyResult;

pub trait UptimeService: Send + Sync {
    /// Time since the service finished initializing; zero before that.
    fn uptime(&self) -> Duration;
}

struct InstantUptimeService {
    started_at: OnceLock<Instant>,
}

#[async_trait]
impl Service for InstantUptimeService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        let _ = self.started_at.set(Instant::now());
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        info!(uptime_ms = self.uptime().as_millis() as u64, "uptime service stopped");
        Ok(ServiceShutdownResult::Success)
    }
}

impl UptimeService for InstantUptimeService {
    fn uptime(&self) -> Duration {
        self.started_at
            .get()
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct UptimeServiceFactory;

impl ServiceFactory for UptimeServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn UptimeService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn UptimeService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(InstantUptimeService {
            started_at: OnceLock::new(),
        });
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn UptimeService>(service)],
        ))
    }
}
