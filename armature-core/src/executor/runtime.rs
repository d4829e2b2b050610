//! Construction of the per-worker monoio runtime.

use std::future::Future;

use monoio::{time::TimeDriver, LegacyDriver, Runtime, RuntimeBuilder};
use tracing::debug;

use crate::config::{RuntimeConfig, RuntimeType};

// Lowest sqpoll idle time the kernel-side poller is configured with.
#[cfg(target_os = "linux")]
const SQPOLL_IDLE_FLOOR_MS: u32 = 1000;

/// The monoio runtime driving one worker thread.
///
/// A worker gets io_uring when the config asks for it and the running
/// kernel supports it; everything else falls back to the poll-based legacy
/// driver. Timers are enabled unconditionally so services pinned to worker
/// groups can use monoio time primitives.
pub enum WorkerRuntime {
    #[cfg(target_os = "linux")]
    Uring(Runtime<TimeDriver<monoio::IoUringDriver>>),
    Legacy(Runtime<TimeDriver<LegacyDriver>>),
}

impl WorkerRuntime {
    pub fn build(config: &RuntimeConfig) -> Self {
        match effective_runtime_type(config) {
            #[cfg(target_os = "linux")]
            RuntimeType::IoUring => Self::Uring(build_uring(config)),
            RuntimeType::Legacy => Self::Legacy(build_legacy(config)),
        }
    }

    pub fn block_on<F>(&mut self, future: F) -> F::Output
    where
        F: Future,
    {
        match self {
            #[cfg(target_os = "linux")]
            Self::Uring(runtime) => runtime.block_on(future),
            Self::Legacy(runtime) => runtime.block_on(future),
        }
    }
}

/// The driver the worker will actually run, after probing kernel support.
fn effective_runtime_type(config: &RuntimeConfig) -> RuntimeType {
    #[cfg(target_os = "linux")]
    if config.runtime_type == RuntimeType::IoUring {
        if monoio::utils::detect_uring() {
            return RuntimeType::IoUring;
        }
        debug!("io_uring unavailable on this kernel, using the legacy driver");
    }
    #[cfg(not(target_os = "linux"))]
    let _ = config;
    RuntimeType::Legacy
}

#[cfg(target_os = "linux")]
fn build_uring(config: &RuntimeConfig) -> Runtime<TimeDriver<monoio::IoUringDriver>> {
    let mut builder = RuntimeBuilder::<monoio::IoUringDriver>::new();
    if let Some(idle_ms) = config.sqpoll_idle {
        let mut uring = io_uring::IoUring::builder();
        uring.setup_sqpoll(idle_ms.max(SQPOLL_IDLE_FLOOR_MS));
        builder = builder.uring_builder(uring);
    }
    builder
        .enable_timer()
        .with_entries(config.entries)
        .build()
        .expect("failed to build io_uring worker runtime")
}

fn build_legacy(config: &RuntimeConfig) -> Runtime<TimeDriver<LegacyDriver>> {
    RuntimeBuilder::<LegacyDriver>::new()
        .enable_timer()
        .with_entries(config.entries)
        .build()
        .expect("failed to build legacy worker runtime")
}
