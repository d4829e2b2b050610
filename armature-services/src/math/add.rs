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
pub trait AddService: Send + Sync {
    async fn add_async(&self, lhs: f64, rhs: f64) -> f64;
}

struct DefaultAddService;

#[async_trait]
impl Service for DefaultAddService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        debug!("add service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        Ok(ServiceShutdownResult::Success)
    }
}

#[async_trait]
impl AddService for DefaultAddService {
    async fn add_async(&self, lhs: f64, rhs: f64) -> f64 {
        lhs + rhs
    }
}

#[derive(Default)]
pub struct AddServiceFactory;

impl ServiceFactory for AddServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn AddService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn AddService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(DefaultAddService);
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn AddService>(service)],
        ))
    }
}
