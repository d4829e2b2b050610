use crate::aggregate::AggregateError;

/// A type alias for `anyhow::Error`, representing any error type.
///
/// Used at the open-ended boundaries of the framework (service factories,
/// service init/shutdown bodies) where the author decides what can go wrong.
pub type AnyError = anyhow::Error;

/// A type alias for `Result<T, E>` where `E` defaults to [`AnyError`].
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;

#[macro_export]
macro_rules! bail_into {
    ($msg:literal $(,)?) => {
        return Err(::anyhow::anyhow!($msg).into())
    };
    ($err:expr $(,)?) => {
        return Err(::anyhow::anyhow!($err).into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(::anyhow::anyhow!($fmt, $($arg)*).into())
    };
}

/// The closed error taxonomy of the framework itself.
///
/// Service authors report their own failures through [`AnyError`]; the
/// framework wraps them into the matching kind here when they cross a
/// lifecycle boundary.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    /// A factory reported no supported interfaces, or failed to produce a
    /// usable service instance.
    #[error("invalid service factory: {0}")]
    InvalidServiceFactory(String),

    /// A structurally invalid argument reached the framework.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A factory of the same concrete type was already registered.
    #[error("duplicate service registration for factory type '{0}'")]
    DuplicateServiceRegistration(&'static str),

    /// The registry rejects registrations once its records were extracted.
    #[error("cannot register services after the registry has been extracted")]
    RegistryExtracted,

    /// A priority group must contain at least one service.
    #[error("cannot register an empty priority group at priority {0}")]
    EmptyPriorityGroup(u32),

    /// Priority groups must be registered in strictly decreasing order.
    #[error(
        "priority order violation: priority {attempted} must be strictly below \
         the last registered priority {last}"
    )]
    InvalidPriorityOrder { attempted: u32, last: u32 },

    /// No service is registered for the requested interface type.
    #[error("no service found for type '{0}'")]
    UnknownService(&'static str),

    /// More than one service matches the requested interface type.
    #[error("multiple services found for type '{0}', use try_get_services")]
    MultipleServicesFound(&'static str),

    /// Provider misuse: cross-thread access, or access through a severed
    /// proxy.
    #[error("service provider: {0}")]
    ServiceProvider(String),

    /// The dispatch target was already destroyed (or its executor stopped)
    /// when a hard invocation reached it.
    #[error("service disposed: {0}")]
    ServiceDisposed(&'static str),

    /// A service's `init_async` returned non-success or failed.
    #[error("service '{0}' failed to initialize: {1}")]
    ServiceInitFailed(String, String),

    /// A service's `shutdown_async` failed.
    #[error("service '{0}' failed to shut down: {1}")]
    ServiceShutdownFailed(String, String),

    /// One or more inner errors, preserved in insertion order.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The stop source was requested while a lifecycle chain was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl FrameworkError {
    /// `ServiceDisposed` tagged with the target type, for dispatch helpers.
    pub fn disposed<T: ?Sized>() -> Self {
        FrameworkError::ServiceDisposed(std::any::type_name::<T>())
    }
}
