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
pub trait MultiplyService: Send + Sync {
    async fn multiply_async(&self, lhs: f64, rhs: f64) -> f64;
}

struct DefaultMultiplyService;

#[async_trait]
impl Service for DefaultMultiplyService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        debug!("multiply service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        Ok(ServiceShutdownResult::Success)
    }
}

#[async_trait]
impl MultiplyService for DefaultMultiplyService {
    async fn multiply_async(&self, lhs: f64, rhs: f64) -> f64 {
        lhs * rhs
    }
}

#[derive(Default)]
pub struct MultiplyServiceFactory;

impl ServiceFactory for MultiplyServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn MultiplyService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn MultiplyService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(DefaultMultiplyService);
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn MultiplyService>(service)],
        ))
    }
}
