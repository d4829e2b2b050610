//! Pre-startup service registration.
//!
//! Applications register factories here before handing the extracted records
//! to the [`LifecycleManager`](crate::lifecycle::LifecycleManager). The
//! registry is single-use: extraction freezes it.

use std::any::{type_name, TypeId};
use std::fmt;

use tracing::debug;

use crate::service::ServiceFactory;
use crate::FrameworkError;

/// Launch priority of a service. Higher values start first, and a service
/// may only depend on services of strictly higher priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceLaunchPriority(u32);

impl ServiceLaunchPriority {
    pub const fn new(priority: u32) -> Self {
        Self(priority)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ServiceLaunchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies the thread group a service is pinned to. Group `0` is the
/// main (cooperative) thread; ids from 1 upwards are allocated by the
/// registry for dedicated worker threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceThreadGroupId(u32);

impl ServiceThreadGroupId {
    /// The reserved main (cooperative) thread group.
    pub const MAIN: ServiceThreadGroupId = ServiceThreadGroupId(0);

    pub const fn new(group_id: u32) -> Self {
        Self(group_id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ServiceThreadGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One registered factory with its launch metadata. Factory ownership lives
/// in the record; records are move-only.
pub struct ServiceRegistrationRecord {
    pub factory: Box<dyn ServiceFactory>,
    pub priority: ServiceLaunchPriority,
    pub thread_group_id: ServiceThreadGroupId,
}

impl ServiceRegistrationRecord {
    pub fn new(
        factory: Box<dyn ServiceFactory>,
        priority: ServiceLaunchPriority,
        thread_group_id: ServiceThreadGroupId,
    ) -> Self {
        Self {
            factory,
            priority,
            thread_group_id,
        }
    }
}

struct RegisteredFactory {
    factory_type: TypeId,
    factory_name: &'static str,
    record: ServiceRegistrationRecord,
}

/// Catalog of service factories collected before startup.
pub struct ServiceRegistry {
    registrations: Vec<RegisteredFactory>,
    next_thread_group_id: u32,
    extracted: bool,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            next_thread_group_id: 1,
            extracted: false,
        }
    }

    /// Registers a factory with its launch priority and thread group.
    ///
    /// The factory's concrete type is the registration key: registering a
    /// second factory of the same type fails with
    /// `DuplicateServiceRegistration`. Registration after
    /// [`extract_registrations`](Self::extract_registrations) fails with
    /// `RegistryExtracted`, and a factory reporting no supported interfaces
    /// fails with `InvalidServiceFactory`.
    pub fn register_service<F>(
        &mut self,
        factory: F,
        priority: ServiceLaunchPriority,
        thread_group_id: ServiceThreadGroupId,
    ) -> Result<(), FrameworkError>
    where
        F: ServiceFactory,
    {
        if self.extracted {
            return Err(FrameworkError::RegistryExtracted);
        }

        if factory.supported_interfaces().is_empty() {
            return Err(FrameworkError::InvalidServiceFactory(format!(
                "factory '{}' must support at least one interface",
                type_name::<F>()
            )));
        }

        let factory_type = TypeId::of::<F>();
        if self
            .registrations
            .iter()
            .any(|registered| registered.factory_type == factory_type)
        {
            return Err(FrameworkError::DuplicateServiceRegistration(
                type_name::<F>(),
            ));
        }

        debug!(
            factory = type_name::<F>(),
            priority = priority.value(),
            thread_group = thread_group_id.value(),
            "registering service factory"
        );
        self.registrations.push(RegisteredFactory {
            factory_type,
            factory_name: type_name::<F>(),
            record: ServiceRegistrationRecord::new(Box::new(factory), priority, thread_group_id),
        });
        Ok(())
    }

    /// Allocates a fresh worker thread group id, monotonically from 1.
    pub fn create_service_thread_group_id(&mut self) -> ServiceThreadGroupId {
        let group_id = ServiceThreadGroupId::new(self.next_thread_group_id);
        self.next_thread_group_id += 1;
        group_id
    }

    /// The reserved main (cooperative) thread group id.
    pub fn main_service_thread_group_id(&self) -> ServiceThreadGroupId {
        ServiceThreadGroupId::MAIN
    }

    /// Moves every registration out, in registration order, and freezes the
    /// registry. A second extraction returns an empty vector.
    pub fn extract_registrations(&mut self) -> Vec<ServiceRegistrationRecord> {
        self.extracted = true;
        let records: Vec<_> = self
            .registrations
            .drain(..)
            .map(|registered| {
                debug!(factory = registered.factory_name, "extracting registration");
                registered.record
            })
            .collect();
        debug!(count = records.len(), "registry extracted");
        records
    }
}
