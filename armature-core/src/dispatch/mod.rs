//! Lifetime-checked handles for addressing objects that live on another
//! thread.
//!
//! An [`ExecutorContext`] pairs a weak reference to a target object with the
//! [`Executor`] of the thread that owns it. The context never keeps the
//! target alive; every use upgrades the weak reference on the owner thread.
//! A [`DispatchContext`] pairs two of them, so a call made from thread A can
//! run on thread B and deliver its result back onto A only if the caller
//! still exists.

use std::sync::{Arc, Weak};

use crate::executor::Executor;

mod invoke;
pub use invoke::{
    dispatch_invoke_async, dispatch_try_invoke_async, invoke_async, try_invoke_async,
    try_invoke_post,
};

/// A (weak reference, executor) pair addressing `T` on its owner thread.
pub struct ExecutorContext<T: ?Sized> {
    target: Weak<T>,
    executor: Executor,
}

impl<T: ?Sized> ExecutorContext<T> {
    /// Observes `target` without extending its lifetime.
    pub fn new(target: &Arc<T>, executor: Executor) -> Self {
        Self {
            target: Arc::downgrade(target),
            executor,
        }
    }

    /// Attempts to upgrade the weak reference. `None` once every strong
    /// reference is gone.
    pub fn try_lock(&self) -> Option<Arc<T>> {
        self.target.upgrade()
    }

    /// Racy liveness predicate; use [`try_lock`](Self::try_lock) before any
    /// actual access.
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl<T: ?Sized> Clone for ExecutorContext<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            executor: self.executor.clone(),
        }
    }
}

/// Paired source and target contexts for cross-thread calls.
///
/// `S` is typically a lifetime tracker for the calling side; `T` is the
/// callee. The two liveness checks are independent.
pub struct DispatchContext<S: ?Sized, T: ?Sized> {
    source: ExecutorContext<S>,
    target: ExecutorContext<T>,
}

impl<S: ?Sized, T: ?Sized> DispatchContext<S, T> {
    pub fn new(source: ExecutorContext<S>, target: ExecutorContext<T>) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> &ExecutorContext<S> {
        &self.source
    }

    pub fn target(&self) -> &ExecutorContext<T> {
        &self.target
    }

    pub fn source_executor(&self) -> &Executor {
        self.source.executor()
    }

    pub fn target_executor(&self) -> &Executor {
        self.target.executor()
    }

    pub fn is_source_alive(&self) -> bool {
        self.source.is_alive()
    }

    pub fn is_target_alive(&self) -> bool {
        self.target.is_alive()
    }
}

impl<S: ?Sized, T: ?Sized> Clone for DispatchContext<S, T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }
}

/// Marker object whose lifetime stands in for "the calling side still
/// exists" in a [`DispatchContext`].
#[derive(Debug, Default)]
pub struct LifeTracker;

#[cfg(test)]
mod tests {
    use crate::executor::executor_pair;

    use super::*;

    #[test]
    fn test_try_lock_tracks_strong_references() {
        let (executor, _queue) = executor_pair();
        let value = Arc::new(42u32);
        let context = ExecutorContext::new(&value, executor);

        assert!(context.is_alive());
        let locked = context.try_lock().unwrap();
        assert_eq!(*locked, 42);
        drop(locked);

        // While any strong reference lives, try_lock succeeds.
        let clone = value.clone();
        drop(value);
        assert!(context.try_lock().is_some());

        drop(clone);
        assert!(!context.is_alive());
        assert!(context.try_lock().is_none());
    }

    #[test]
    fn test_context_clone_observes_same_target() {
        let (executor, _queue) = executor_pair();
        let value = Arc::new(String::from("shared"));
        let context = ExecutorContext::new(&value, executor);
        let cloned = context.clone();

        drop(value);
        assert!(context.try_lock().is_none());
        assert!(cloned.try_lock().is_none());
    }

    #[test]
    fn test_dispatch_liveness_is_independent() {
        let (executor_a, _queue_a) = executor_pair();
        let (executor_b, _queue_b) = executor_pair();

        let source = Arc::new(LifeTracker);
        let target = Arc::new(7u8);
        let context = DispatchContext::new(
            ExecutorContext::new(&source, executor_a),
            ExecutorContext::new(&target, executor_b),
        );

        assert!(context.is_source_alive());
        assert!(context.is_target_alive());

        drop(target);
        assert!(context.is_source_alive());
        assert!(!context.is_target_alive());

        drop(source);
        assert!(!context.is_source_alive());
    }
}
