//! The arithmetic services: one interface and one default implementation per
//! operation. Deliberately tiny; they exist so higher-level services have
//! real dependencies to resolve through the provider.

mod add;
mod divide;
mod multiply;
mod subtract;

pub use add::{AddService, AddServiceFactory};
pub use divide::{DivideService, DivideServiceFactory};
pub use multiply::{MultiplyService, MultiplyServiceFactory};
pub use subtract::{SubtractService, SubtractServiceFactory};
