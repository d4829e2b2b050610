use std::sync::Arc;

use parking_lot::RwLock;

use super::ServiceProvider;
use crate::service::Service;
use crate::FrameworkError;

/// A severable indirection over a [`ServiceProvider`].
///
/// Services constructed during startup see the provider only through this
/// proxy. If startup fails, the host calls [`clear`](Self::clear), after
/// which hard lookups fail and try-lookups report absence. A partially
/// constructed service can never reach a half-built provider.
pub struct ServiceProviderProxy {
    provider: RwLock<Option<Arc<ServiceProvider>>>,
}

impl ServiceProviderProxy {
    pub fn new(provider: Arc<ServiceProvider>) -> Self {
        Self {
            provider: RwLock::new(Some(provider)),
        }
    }

    /// Severs the proxy from the underlying provider.
    pub fn clear(&self) {
        *self.provider.write() = None;
    }

    pub fn is_cleared(&self) -> bool {
        self.provider.read().is_none()
    }

    fn provider(&self) -> Result<Arc<ServiceProvider>, FrameworkError> {
        self.provider
            .read()
            .clone()
            .ok_or_else(|| FrameworkError::ServiceProvider("provider has been cleared".into()))
    }

    pub fn get_service<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Arc<I>, FrameworkError> {
        self.provider()?.get_service::<I>()
    }

    pub fn try_get_service<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Option<Arc<I>>, FrameworkError> {
        match &*self.provider.read() {
            None => Ok(None),
            Some(provider) => provider.try_get_service::<I>(),
        }
    }

    pub fn try_get_services<I: ?Sized + Send + Sync + 'static>(
        &self,
        out: &mut Vec<Arc<I>>,
    ) -> Result<bool, FrameworkError> {
        match &*self.provider.read() {
            None => Ok(false),
            Some(provider) => provider.try_get_services::<I>(out),
        }
    }

    pub fn get_all_service_controls(&self) -> Result<Vec<Arc<dyn Service>>, FrameworkError> {
        match &*self.provider.read() {
            None => Ok(Vec::new()),
            Some(provider) => provider.get_all_service_controls(),
        }
    }
}
