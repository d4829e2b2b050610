//! Demo services for the armature framework: a small arithmetic stack, an
//! expression-evaluating calculator that consumes it through the provider,
//! and two trivial background services.

use armature_core::registry::{ServiceLaunchPriority, ServiceRegistry, ServiceThreadGroupId};
use armature_core::FrameworkError;

pub mod calculator;
pub mod heartbeat;
pub mod math;
pub mod uptime;

pub use calculator::{CalculatorService, CalculatorServiceFactory};
pub use heartbeat::{HeartbeatService, HeartbeatServiceFactory};
pub use math::{
    AddService, AddServiceFactory, DivideService, DivideServiceFactory, MultiplyService,
    MultiplyServiceFactory, SubtractService, SubtractServiceFactory,
};
pub use uptime::{UptimeService, UptimeServiceFactory};

/// The arithmetic services every other demo service may depend on.
pub const MATH_SERVICES_PRIORITY: ServiceLaunchPriority = ServiceLaunchPriority::new(500);

/// Background services on dedicated worker threads.
pub const BACKGROUND_SERVICES_PRIORITY: ServiceLaunchPriority = ServiceLaunchPriority::new(200);

/// Application-facing services on the main thread.
pub const APPLICATION_SERVICES_PRIORITY: ServiceLaunchPriority = ServiceLaunchPriority::new(100);

/// Registers the full demo stack: arithmetic and application services on the
/// main thread group, the uptime service on `background_group`.
pub fn register_demo_services(
    registry: &mut ServiceRegistry,
    background_group: ServiceThreadGroupId,
) -> Result<(), FrameworkError> {
    let main_group = registry.main_service_thread_group_id();

    registry.register_service(
        AddServiceFactory::default(),
        MATH_SERVICES_PRIORITY,
        main_group,
    )?;
    registry.register_service(
        SubtractServiceFactory::default(),
        MATH_SERVICES_PRIORITY,
        main_group,
    )?;
    registry.register_service(
        MultiplyServiceFactory::default(),
        MATH_SERVICES_PRIORITY,
        main_group,
    )?;
    registry.register_service(
        DivideServiceFactory::default(),
        MATH_SERVICES_PRIORITY,
        main_group,
    )?;

    registry.register_service(
        UptimeServiceFactory::default(),
        BACKGROUND_SERVICES_PRIORITY,
        background_group,
    )?;

    registry.register_service(
        CalculatorServiceFactory::default(),
        APPLICATION_SERVICES_PRIORITY,
        main_group,
    )?;
    registry.register_service(
        HeartbeatServiceFactory::default(),
        APPLICATION_SERVICES_PRIORITY,
        main_group,
    )?;
    Ok(())
}
