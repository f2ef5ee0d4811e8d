#![forbid(unsafe_code)]

//! Captured synchronization context.
//!
//! [`SyncContext`] is the base every synchronized object builds on. It
//! remembers the home executor that was ambient at construction time, posts
//! deferred work there, and carries the object's [`LifecycleFlag`].
//!
//! The executor is held through a `Weak` reference: the context never keeps
//! its executor alive. Work posted after the executor went away is discarded
//! with a WARN event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak, mpsc};

use arc_swap::ArcSwapOption;

use super::{HomeExecutor, SyncOperation, current, current_id};
use crate::error::{ContextError, panic_message};

/// Monotonic disposed flag shared between an object and its pending work.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct LifecycleFlag {
    disposed: Arc<AtomicBool>,
}

impl LifecycleFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Flip to disposed. Returns `true` only for the call that flipped it.
    fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }
}

/// Home-executor binding plus lifecycle for one synchronized object.
pub struct SyncContext {
    executor: ArcSwapOption<Weak<dyn HomeExecutor>>,
    affinity: SyncOperation,
    lifecycle: LifecycleFlag,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("affinity", &self.affinity)
            .field("disposed", &self.lifecycle.is_disposed())
            .finish()
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::capture()
    }
}

impl SyncContext {
    /// Bind to the calling thread's ambient executor, or stay unbound when
    /// there is none.
    ///
    /// An ambient executor that is installed but already dropped still
    /// binds: deferred work is then discarded with a WARN event, as it is
    /// for a context whose executor goes away later.
    #[must_use]
    pub fn capture() -> Self {
        match (current(), current_id()) {
            (Some(executor), _) => Self::bound(&executor),
            (None, Some(id)) => {
                tracing::debug!(executor_id = id.as_u64(), "context.bound_to_dropped_executor");
                Self {
                    executor: ArcSwapOption::empty(),
                    affinity: SyncOperation::bound(id),
                    lifecycle: LifecycleFlag::new(),
                }
            }
            (None, None) => Self::unbound(),
        }
    }

    /// Bind to `executor` without taking ownership of it.
    #[must_use]
    pub fn bound(executor: &Arc<dyn HomeExecutor>) -> Self {
        let id = executor.id();
        tracing::trace!(executor_id = id.as_u64(), "context.bound");
        Self {
            executor: ArcSwapOption::from_pointee(Arc::downgrade(executor)),
            affinity: SyncOperation::bound(id),
            lifecycle: LifecycleFlag::new(),
        }
    }

    /// No executor: deferred work runs inline on the posting thread.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            executor: ArcSwapOption::empty(),
            affinity: SyncOperation::unbound(),
            lifecycle: LifecycleFlag::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn affinity(&self) -> &SyncOperation {
        &self.affinity
    }

    #[inline]
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleFlag {
        &self.lifecycle
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    fn live_executor(&self) -> Option<Arc<dyn HomeExecutor>> {
        self.executor.load_full().and_then(|weak| weak.upgrade())
    }

    /// Run `task` later on the home executor.
    ///
    /// Unbound contexts run it immediately on the calling thread. Disposed
    /// contexts drop it silently. If the executor is gone or refuses the
    /// task, the task is dropped and a WARN event is emitted.
    pub fn context_post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.lifecycle.is_disposed() {
            tracing::trace!("context.post_after_dispose");
            return;
        }
        let Some(id) = self.affinity.executor_id() else {
            task();
            return;
        };
        match self.live_executor() {
            Some(executor) => {
                if let Err(err) = executor.post(Box::new(task)) {
                    tracing::warn!(executor_id = id.as_u64(), error = %err, "discarding deferred task");
                }
            }
            None => {
                tracing::warn!(
                    executor_id = id.as_u64(),
                    "home executor dropped; discarding deferred task"
                );
            }
        }
    }

    /// Run `task` on the home executor and wait for its result.
    ///
    /// Runs inline when the caller already is on the home executor or the
    /// context is unbound; a panic then unwinds into the caller as usual.
    /// Otherwise a panic on the executor is returned as
    /// [`ContextError::TaskPanicked`].
    ///
    /// Blocks until the executor gets to the task. Against a
    /// [`MessagePump`](super::MessagePump) that means until someone pumps it.
    pub fn context_send<F, R>(&self, task: F) -> Result<R, ContextError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.lifecycle.is_disposed() {
            return Err(ContextError::Disposed);
        }
        if self.affinity.is_current() {
            return Ok(task());
        }
        let executor = self.live_executor().ok_or(ContextError::ExecutorGone)?;
        let (tx, rx) = mpsc::sync_channel(1);
        executor.post(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| panic_message(payload.as_ref()));
            let _ = tx.send(outcome);
        }))?;
        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ContextError::TaskPanicked(message)),
            Err(_) => Err(ContextError::Cancelled),
        }
    }

    /// Flip the lifecycle flag. Returns `true` for the first call only; the
    /// caller then owns teardown and finishes it with [`dispose_hook`](Self::dispose_hook).
    pub fn begin_dispose(&self) -> bool {
        self.lifecycle.mark_disposed()
    }

    /// Base teardown: release the executor reference.
    ///
    /// `disposing` is `false` when teardown runs from `Drop` rather than an
    /// explicit dispose call.
    pub fn dispose_hook(&self, disposing: bool) {
        self.executor.store(None);
        tracing::debug!(
            executor_id = self.affinity.executor_id().map(|id| id.as_u64()),
            disposing,
            "context.disposed"
        );
    }

    /// Dispose a standalone context. Idempotent.
    pub fn dispose(&self) {
        if self.begin_dispose() {
            self.dispose_hook(true);
        }
    }
}
