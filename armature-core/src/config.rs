//! Runtime and lifecycle configuration.
//!
//! [`RuntimeConfig`] tunes the per-worker-thread runtime (driver selection,
//! io_uring entries, CPU affinity); [`LifecycleManagerConfig`] carries it
//! together with the lifecycle-level knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// Default iouring/epoll entries: 32k
const DEFAULT_ENTRIES: u32 = 32768;

// Clamp applied to a process tick's sleep hint when sleeping is restricted.
const DEFAULT_RESTRICTED_SLEEP_LIMIT_MS: u64 = 100;

/// Configuration options for the per-thread-group worker runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of I/O entries for event handling for io_uring.
    #[serde(default = "default_entries")]
    pub entries: u32,

    /// Idle timeout for submission queue polling (io_uring specific).
    pub sqpoll_idle: Option<u32>,

    /// The type of runtime to use on worker threads.
    #[serde(default)]
    pub runtime_type: RuntimeType,

    /// Whether to pin each worker thread to a CPU core.
    #[serde(default = "default_cpu_affinity")]
    pub cpu_affinity: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            entries: default_entries(),
            sqpoll_idle: None,
            runtime_type: Default::default(),
            cpu_affinity: default_cpu_affinity(),
        }
    }
}

/// Selects the runtime backend driving each worker thread.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// io_uring-based runtime (Linux only).
    #[cfg(target_os = "linux")]
    IoUring,

    /// Poll-based fallback runtime.
    Legacy,
}

impl Default for RuntimeType {
    #[cfg(target_os = "linux")]
    fn default() -> Self {
        Self::IoUring
    }
    #[cfg(not(target_os = "linux"))]
    fn default() -> Self {
        Self::Legacy
    }
}

/// Configuration for a [`LifecycleManager`](crate::lifecycle::LifecycleManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleManagerConfig {
    /// Runtime settings applied to every managed worker thread.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Clamp, in milliseconds, applied to process sleep hints when a host
    /// restricts sleeping. See
    /// [`ProcessResult::allow_sleep_with_limit`](crate::service::ProcessResult::allow_sleep_with_limit).
    #[serde(default = "default_restricted_sleep_limit_ms")]
    pub restricted_sleep_limit_ms: u64,
}

impl LifecycleManagerConfig {
    pub fn restricted_sleep_limit(&self) -> Duration {
        Duration::from_millis(self.restricted_sleep_limit_ms)
    }
}

impl Default for LifecycleManagerConfig {
    fn default() -> Self {
        LifecycleManagerConfig {
            runtime: Default::default(),
            restricted_sleep_limit_ms: default_restricted_sleep_limit_ms(),
        }
    }
}

fn default_entries() -> u32 {
    DEFAULT_ENTRIES
}

fn default_cpu_affinity() -> bool {
    false
}

fn default_restricted_sleep_limit_ms() -> u64 {
    DEFAULT_RESTRICTED_SLEEP_LIMIT_MS
}
