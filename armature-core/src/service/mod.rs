//! The service author contract.
//!
//! A service is a long-lived object owned by one host thread: created by its
//! factory, initialized asynchronously, ticked through [`Service::process`],
//! and eventually shut down asynchronously. All of its methods run on the
//! owner thread of its host; the `Send + Sync` bounds exist so the instance
//! can be *addressed* (weakly referenced, looked up) from other threads, not
//! so it can be called from them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::ServiceProviderProxy;
use crate::AnyResult;

mod factory;
mod process_result;

pub use factory::{InterfaceDescriptor, InterfaceHandle, ServiceFactory, ServiceInstanceInfo};
pub use process_result::{ProcessResult, DEFAULT_MAX_SLEEP_LIMIT};

/// Outcome of [`Service::init_async`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceInitResult {
    Success,
    Failure(String),
}

/// Outcome of [`Service::shutdown_async`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceShutdownResult {
    Success,
    Failure(String),
}

/// Context handed to factories and services during startup.
///
/// Exposes the host's service provider through a severable proxy: if startup
/// fails, the host cuts the proxy off so a partially constructed service can
/// never reach a half-built provider.
#[derive(Clone)]
pub struct ServiceCreateInfo {
    provider: Arc<ServiceProviderProxy>,
}

impl ServiceCreateInfo {
    pub fn new(provider: Arc<ServiceProviderProxy>) -> Self {
        Self { provider }
    }

    /// The provider to resolve dependencies from. Only services of strictly
    /// higher launch priority are available here.
    pub fn provider(&self) -> &ServiceProviderProxy {
        &self.provider
    }

    /// Shared handle to the proxy, for services that keep it past init.
    pub fn provider_arc(&self) -> Arc<ServiceProviderProxy> {
        self.provider.clone()
    }
}

/// The lifecycle contract every hosted service implements.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Initializes the service. Dependencies are resolved through
    /// `create_info.provider()`. Returning `Ok(Failure(..))` and returning
    /// `Err(..)` are both treated as initialization failures by the host.
    async fn init_async(&self, create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult>;

    /// Shuts the service down. A `Ok(Failure(..))` outcome is logged but not
    /// treated as an error; `Err(..)` is collected by the host.
    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult>;

    /// One synchronous tick on the owner thread.
    fn process(&self) -> ProcessResult {
        ProcessResult::NoSleepLimit
    }
}

/// Descriptor for one service a host should start: a display name plus the
/// factory that creates it.
pub struct StartServiceRecord {
    pub service_name: String,
    pub factory: Box<dyn ServiceFactory>,
}

impl StartServiceRecord {
    pub fn new(service_name: impl Into<String>, factory: Box<dyn ServiceFactory>) -> Self {
        Self {
            service_name: service_name.into(),
            factory,
        }
    }
}
