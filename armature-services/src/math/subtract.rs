use std::sync::Arc;

use anyhow::ensure;
use async_trait::async_trait;
use tracing::debug;

use armature_core::service::{
    InterfaceDescriptor, InterfaceHandle, Service, ServiceCreateInfo, ServiceFactory,
    ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
};
use armature_core::AnyResult;

#[async_trait]
pub trait SubtractService: Send + Sync {
    async fn subtract_async(&self, lhs: f64, rhs: f64) -> f64;
}

struct DefaultSubtractService;

#[async_trait]
impl Service for DefaultSubtractService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        debug!("subtract service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        Ok(ServiceShutdownResult::Success)
    }
}

#[async_trait]
impl SubtractService for DefaultSubtractService {
    async fn subtract_async(&self, lhs: f64, rhs: f64) -> f64 {
        lhs - rhs
    }
}

#[derive(Default)]
pub struct SubtractServiceFactory;

impl ServiceFactory for SubtractServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn SubtractService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn SubtractService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(DefaultSubtractService);
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn SubtractService>(service)],
        ))
    }
}
