#![forbid(unsafe_code)]

use super::{ExecutorId, current_id};

/// Thread-affinity descriptor: which home executor an object is bound to.
///
/// An unbound descriptor means no executor was captured and deferred work
/// runs inline on whichever thread produces it; every thread counts as
/// "home" in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyncOperation {
    executor: Option<ExecutorId>,
}

impl SyncOperation {
    #[must_use]
    pub const fn unbound() -> Self {
        Self { executor: None }
    }

    #[must_use]
    pub const fn bound(executor: ExecutorId) -> Self {
        Self {
            executor: Some(executor),
        }
    }

    #[inline]
    #[must_use]
    pub const fn executor_id(&self) -> Option<ExecutorId> {
        self.executor
    }

    #[inline]
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.executor.is_some()
    }

    /// Whether the calling thread is already running on the home executor.
    #[must_use]
    pub fn is_current(&self) -> bool {
        match self.executor {
            None => true,
            Some(id) => current_id() == Some(id),
        }
    }
}
