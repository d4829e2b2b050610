use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::service::{Service, ServiceCreateInfo};
use crate::AnyResult;

/// Identity of a service interface: the `TypeId` of the (usually `dyn`)
/// interface type plus its name for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceDescriptor {
    pub id: TypeId,
    pub name: &'static str,
}

impl InterfaceDescriptor {
    pub fn of<I: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<I>(),
            name: type_name::<I>(),
        }
    }
}

impl fmt::Debug for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceDescriptor({})", self.name)
    }
}

/// A type-erased, shareable view of a service under one of its interfaces.
///
/// Produced by the factory (which knows the concrete type), consumed by the
/// provider for type-keyed lookup.
#[derive(Clone)]
pub struct InterfaceHandle {
    descriptor: InterfaceDescriptor,
    view: Arc<dyn Any + Send + Sync>,
}

impl InterfaceHandle {
    /// Wraps an `Arc<I>` interface view, typically `Arc<dyn SomeInterface>`.
    pub fn new<I: ?Sized + Send + Sync + 'static>(view: Arc<I>) -> Self {
        Self {
            descriptor: InterfaceDescriptor::of::<I>(),
            view: Arc::new(view),
        }
    }

    pub fn descriptor(&self) -> InterfaceDescriptor {
        self.descriptor
    }

    /// Recovers the typed interface view; `None` on a type mismatch.
    pub fn downcast<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        self.view.downcast_ref::<Arc<I>>().cloned()
    }

    /// Whether two handles wrap the same underlying view.
    pub(crate) fn ptr_eq(&self, other: &InterfaceHandle) -> bool {
        Arc::ptr_eq(&self.view, &other.view)
    }
}

/// A live service instance together with every interface it supports.
///
/// The interface list must be non-empty; the provider rejects instances
/// without one.
#[derive(Clone)]
pub struct ServiceInstanceInfo {
    pub service: Arc<dyn Service>,
    pub interfaces: Vec<InterfaceHandle>,
}

impl ServiceInstanceInfo {
    pub fn new(service: Arc<dyn Service>, interfaces: Vec<InterfaceHandle>) -> Self {
        Self {
            service,
            interfaces,
        }
    }

    /// Name of the first supported interface, used as the service's display
    /// name in logs and errors.
    pub fn display_name(&self) -> &'static str {
        self.interfaces
            .first()
            .map(|handle| handle.descriptor().name)
            .unwrap_or("unknown-service")
    }
}

/// Creates service instances and declares which interfaces they implement.
///
/// A factory's concrete type doubles as its registration identity: the
/// registry refuses to register two factories of the same type.
pub trait ServiceFactory: Send + 'static {
    /// The interface types this factory can produce. Must be non-empty.
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor>;

    /// Creates the service instance for the requested interface.
    ///
    /// The returned info must carry the service and at least one interface
    /// handle. `create_info` gives access to already-started dependencies.
    fn create(
        &self,
        interface: InterfaceDescriptor,
        create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo>;
}
