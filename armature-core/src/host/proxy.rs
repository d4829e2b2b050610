use super::ServiceHost;
use crate::dispatch::{
    dispatch_invoke_async, dispatch_try_invoke_async, try_invoke_post, DispatchContext,
    LifeTracker,
};
use crate::registry::ServiceLaunchPriority;
use crate::service::StartServiceRecord;
use crate::FrameworkError;

/// Thread-safe facade over a [`ServiceHost`] living on another thread.
///
/// Every operation is marshalled onto the remote host's executor; the
/// returned futures resolve back on the calling side's executor, and are
/// dropped unseen if the caller's lifetime tracker is gone by then. A dead
/// target fails the hard variants with `ServiceDisposed` and resolves the
/// try-variants to `false`.
#[derive(Clone)]
pub struct ServiceHostProxy {
    context: DispatchContext<LifeTracker, ServiceHost>,
}

impl ServiceHostProxy {
    pub fn new(context: DispatchContext<LifeTracker, ServiceHost>) -> Self {
        Self { context }
    }

    pub fn is_target_alive(&self) -> bool {
        self.context.is_target_alive()
    }

    /// Starts `services` as one priority group on the remote host.
    pub async fn try_start_services_async(
        &self,
        services: Vec<StartServiceRecord>,
        priority: ServiceLaunchPriority,
    ) -> Result<(), FrameworkError> {
        dispatch_invoke_async(&self.context, move |host| async move {
            host.start_services_on_owner(services, priority).await
        })
        .await?
    }

    /// Shuts down the remote host's priority group, returning per-service
    /// errors in bulk.
    pub async fn try_shutdown_services_async(
        &self,
        priority: ServiceLaunchPriority,
    ) -> Result<Vec<FrameworkError>, FrameworkError> {
        dispatch_invoke_async(&self.context, move |host| async move {
            host.shutdown_services_on_owner(priority).await
        })
        .await
    }

    /// Requests the remote host to shut down; resolves `true` once the host
    /// processed the request, `false` if the host is already gone.
    pub async fn try_request_shutdown_async(&self) -> bool {
        dispatch_try_invoke_async(&self.context, |host| async move {
            host.request_shutdown();
        })
        .await
        .is_some()
    }

    /// Synchronous fire-and-forget shutdown request. Never blocks or fails;
    /// returns whether the request could be posted at all.
    pub fn try_request_shutdown(&self) -> bool {
        try_invoke_post(self.context.target(), |host| host.request_shutdown())
    }
}
