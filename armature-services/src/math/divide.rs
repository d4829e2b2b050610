use std::sync::Arc;

use anyhow::{bail, ensure};
use async_trait::async_trait;
use tracing::debug;

use armature_core::service::{
    InterfaceDescriptor, InterfaceHandle, Service, ServiceCreateInfo, ServiceFactory,
    ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
};
use armature_core::AnyResult;

#[async_trait]
pub trait DivideService: Send + Sync {
    /// Fails on division by zero instead of producing infinities.
    async fn divide_async(&self, lhs: f64, rhs: f64) -> AnyResult<f64>;
}

struct DefaultDivideService;

#[async_trait]
impl Service for DefaultDivideService {
    async fn init_async(&self, _create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        debug!("divide service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        Ok(ServiceShutdownResult::Success)
    }
}

#[async_trait]
impl DivideService for DefaultDivideService {
    async fn divide_async(&self, lhs: f64, rhs: f64) -> AnyResult<f64> {
        if rhs == 0.0 {
            bail!("division by zero");
        }
        Ok(lhs / rhs)
    }
}

#[derive(Default)]
pub struct DivideServiceFactory;

impl ServiceFactory for DivideServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn DivideService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn DivideService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(DefaultDivideService);
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn DivideService>(service)],
        ))
    }
}
