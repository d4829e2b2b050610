//! Generic cross-thread invocation over executor contexts.
//!
//! All helpers follow the same shape: post a closure onto the target's
//! executor, upgrade the weak reference *there*, run the supplied function
//! against the live object, and hand the result back through a oneshot
//! channel. The dispatch variants additionally re-post the completion onto
//! the source executor so the caller resumes on its own thread, dropping
//! the result entirely if the caller no longer exists.
//!
//! Sequential invocations through one context are observed on the target in
//! program order; across different contexts there is no ordering guarantee.

use std::future::Future;
use std::sync::Arc;

use futures_channel::oneshot;

use super::{DispatchContext, ExecutorContext};
use crate::executor::ExecutorTask;
use crate::FrameworkError;

/// Invokes `f` against the target on its executor and awaits the result.
///
/// Fails with `ServiceDisposed` when the target object is gone at execution
/// time, or when its executor no longer accepts work.
pub async fn invoke_async<T, F, Fut, R>(
    context: &ExecutorContext<T>,
    f: F,
) -> Result<R, FrameworkError>
where
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = R> + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let target = context.clone();
    let task: ExecutorTask = Box::new(move || {
        Box::pin(async move {
            match target.try_lock() {
                None => {
                    let _ = tx.send(Err(FrameworkError::disposed::<T>()));
                }
                Some(object) => {
                    let _ = tx.send(Ok(f(object).await));
                }
            }
        })
    });
    if !context.executor().post(task) {
        return Err(FrameworkError::disposed::<T>());
    }
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(FrameworkError::disposed::<T>()),
    }
}

/// Non-failing variant of [`invoke_async`]: resolves to `None` instead of
/// erroring when the target is gone or unreachable.
pub async fn try_invoke_async<T, F, Fut, R>(context: &ExecutorContext<T>, f: F) -> Option<R>
where
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = R> + 'static,
    R: Send + 'static,
{
    invoke_async(context, f).await.ok()
}

/// Fire-and-forget post of `f` against the target.
///
/// The liveness check runs inside the posted closure, so this can return
/// `true` for a target that is already dead; the closure then silently
/// drops the call. The returned bool only reports whether the post was
/// accepted; it is `false` when the target executor's run loop has exited.
pub fn try_invoke_post<T, F>(context: &ExecutorContext<T>, f: F) -> bool
where
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) + Send + 'static,
{
    let target = context.clone();
    context.executor().post_fn(move || {
        if let Some(object) = target.try_lock() {
            f(object);
        }
    })
}

/// Invokes `f` against the target on its executor, then resumes the caller
/// on the *source* executor.
///
/// Target dead (or its executor stopped) at dispatch time fails with
/// `ServiceDisposed`. If the source dies before resumption the result is
/// silently dropped and the awaitable resolves `Cancelled`; the caller, by
/// definition, no longer cares.
pub async fn dispatch_invoke_async<S, T, F, Fut, R>(
    context: &DispatchContext<S, T>,
    f: F,
) -> Result<R, FrameworkError>
where
    S: ?Sized + Send + Sync + 'static,
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = R> + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel::<Result<R, FrameworkError>>();
    let source = context.source().clone();
    let source_executor = context.source_executor().clone();
    let target = context.target().clone();

    let task: ExecutorTask = Box::new(move || {
        Box::pin(async move {
            let result = match target.try_lock() {
                None => Err(FrameworkError::disposed::<T>()),
                Some(object) => Ok(f(object).await),
            };
            // Resume on the caller's executor; a dead source drops the
            // result unseen.
            source_executor.post_fn(move || {
                if source.try_lock().is_some() {
                    let _ = tx.send(result);
                }
            });
        })
    });
    if !context.target_executor().post(task) {
        return Err(FrameworkError::disposed::<T>());
    }
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(FrameworkError::Cancelled),
    }
}

/// Non-failing variant of [`dispatch_invoke_async`].
pub async fn dispatch_try_invoke_async<S, T, F, Fut, R>(
    context: &DispatchContext<S, T>,
    f: F,
) -> Option<R>
where
    S: ?Sized + Send + Sync + 'static,
    T: ?Sized + Send + Sync + 'static,
    F: FnOnce(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = R> + 'static,
    R: Send + 'static,
{
    dispatch_invoke_async(context, f).await.ok()
}
