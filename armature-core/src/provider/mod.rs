//! The thread-affine service locator.
//!
//! Each host owns one [`ServiceProvider`]. Priority groups are registered in
//! strictly descending priority order during startup and yielded back during
//! shutdown; lookups are keyed by interface type and only permitted from the
//! thread that constructed the provider. Cross-thread access is a
//! programming error and fails loudly.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::registry::ServiceLaunchPriority;
use crate::service::{InterfaceHandle, Service, ServiceInstanceInfo};
use crate::FrameworkError;

mod proxy;
pub use proxy::ServiceProviderProxy;

/// Services registered together at one priority level, in registration
/// order. Shutdown walks the group in reverse.
pub struct PriorityGroup {
    pub priority: ServiceLaunchPriority,
    pub services: Vec<ServiceInstanceInfo>,
}

#[derive(Default)]
struct ProviderState {
    groups: Vec<PriorityGroup>,
    by_type: HashMap<TypeId, Vec<InterfaceHandle>>,
}

/// Priority-group-keyed, thread-affine service locator.
pub struct ServiceProvider {
    owner: ThreadId,
    state: RwLock<ProviderState>,
}

impl ServiceProvider {
    /// Creates a provider owned by the calling thread.
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            state: RwLock::new(ProviderState::default()),
        }
    }

    fn validate_thread_access(&self) -> Result<(), FrameworkError> {
        let current = thread::current().id();
        if current != self.owner {
            error!(
                owner = ?self.owner,
                caller = ?current,
                "service provider accessed from wrong thread"
            );
            return Err(FrameworkError::ServiceProvider(format!(
                "accessed from wrong thread (owner {:?}, caller {:?})",
                self.owner, current
            )));
        }
        Ok(())
    }

    /// Appends a priority group.
    ///
    /// Groups must arrive in strictly decreasing priority order, must be
    /// non-empty, and every instance must carry at least one interface.
    pub fn register_priority_group(
        &self,
        priority: ServiceLaunchPriority,
        services: Vec<ServiceInstanceInfo>,
    ) -> Result<(), FrameworkError> {
        self.validate_thread_access()?;

        if services.is_empty() {
            return Err(FrameworkError::EmptyPriorityGroup(priority.value()));
        }

        let mut state = self.state.write();
        if let Some(last) = state.groups.last() {
            if priority >= last.priority {
                return Err(FrameworkError::InvalidPriorityOrder {
                    attempted: priority.value(),
                    last: last.priority.value(),
                });
            }
        }

        for (index, info) in services.iter().enumerate() {
            if info.interfaces.is_empty() {
                return Err(FrameworkError::InvalidArgument(format!(
                    "service at index {index} in priority group {} has no supported interfaces",
                    priority.value()
                )));
            }
        }

        for info in &services {
            for handle in &info.interfaces {
                state
                    .by_type
                    .entry(handle.descriptor().id)
                    .or_default()
                    .push(handle.clone());
            }
        }
        debug!(
            priority = priority.value(),
            count = services.len(),
            "registered priority group"
        );
        state.groups.push(PriorityGroup { priority, services });
        Ok(())
    }

    /// Removes the group at `priority`, returning its services in their
    /// original registration order. `None` when no such group exists;
    /// shutting down an unstarted level is a no-op, not an error.
    pub fn unregister_priority_group(
        &self,
        priority: ServiceLaunchPriority,
    ) -> Result<Option<Vec<ServiceInstanceInfo>>, FrameworkError> {
        self.validate_thread_access()?;

        let mut state = self.state.write();
        let position = match state.groups.iter().position(|g| g.priority == priority) {
            Some(position) => position,
            None => return Ok(None),
        };
        let group = state.groups.remove(position);

        for info in &group.services {
            for handle in &info.interfaces {
                let id = handle.descriptor().id;
                if let Some(entries) = state.by_type.get_mut(&id) {
                    entries.retain(|entry| !entry.ptr_eq(handle));
                    if entries.is_empty() {
                        state.by_type.remove(&id);
                    }
                }
            }
        }
        debug!(
            priority = priority.value(),
            count = group.services.len(),
            "unregistered priority group"
        );
        Ok(Some(group.services))
    }

    /// The unique service implementing interface `I`.
    pub fn get_service<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Arc<I>, FrameworkError> {
        self.validate_thread_access()?;

        let state = self.state.read();
        let entries = state
            .by_type
            .get(&TypeId::of::<I>())
            .map(Vec::as_slice)
            .unwrap_or_default();
        match entries {
            [] => Err(FrameworkError::UnknownService(type_name::<I>())),
            [single] => single.downcast::<I>().ok_or_else(|| {
                FrameworkError::ServiceProvider(format!(
                    "interface handle type mismatch for '{}'",
                    type_name::<I>()
                ))
            }),
            _ => Err(FrameworkError::MultipleServicesFound(type_name::<I>())),
        }
    }

    /// The first registered service implementing `I`, if any.
    ///
    /// Unlike [`get_service`](Self::get_service), multiple matches are not
    /// an error: the first registered one is returned.
    pub fn try_get_service<I: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Option<Arc<I>>, FrameworkError> {
        self.validate_thread_access()?;

        let state = self.state.read();
        Ok(state
            .by_type
            .get(&TypeId::of::<I>())
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.downcast::<I>()))
    }

    /// Appends every service implementing `I` to `out`, in registration
    /// order. Returns whether at least one was added.
    pub fn try_get_services<I: ?Sized + Send + Sync + 'static>(
        &self,
        out: &mut Vec<Arc<I>>,
    ) -> Result<bool, FrameworkError> {
        self.validate_thread_access()?;

        let state = self.state.read();
        let mut added = false;
        if let Some(entries) = state.by_type.get(&TypeId::of::<I>()) {
            for entry in entries {
                if let Some(view) = entry.downcast::<I>() {
                    out.push(view);
                    added = true;
                }
            }
        }
        Ok(added)
    }

    /// Every registered service control, in registration order across
    /// groups (highest priority first).
    pub fn get_all_service_controls(&self) -> Result<Vec<Arc<dyn Service>>, FrameworkError> {
        self.validate_thread_access()?;

        let state = self.state.read();
        Ok(state
            .groups
            .iter()
            .flat_map(|group| group.services.iter().map(|info| info.service.clone()))
            .collect())
    }
}

impl Default for ServiceProvider {
    fn default() -> Self {
        Self::new()
    }
}
