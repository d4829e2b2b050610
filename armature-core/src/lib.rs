//! Core building blocks for multi-threaded service applications.
//!
//! Armature hosts long-lived services across a set of thread groups: a
//! cooperative main thread driven by the application's own loop, plus any
//! number of dedicated worker threads, each running its own single-threaded
//! executor. Services are registered with a priority, started highest-first
//! with transactional rollback, looked up through a thread-affine provider,
//! and addressed across threads through lifetime-checked dispatch contexts.

#[macro_use]
mod error;
pub use error::{AnyError, AnyResult, FrameworkError};

mod aggregate;
pub use aggregate::AggregateError;

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod host;
pub mod lifecycle;
pub mod provider;
pub mod registry;
pub mod service;
