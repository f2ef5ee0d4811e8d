#![forbid(unsafe_code)]

//! Home executors and context capture.
//!
//! A *home executor* is any place that accepts a deferred unit of work and
//! runs it later on a designated thread or loop: a dedicated thread
//! ([`HomeThread`]), a manually drained message pump ([`MessagePump`]), or a
//! caller-provided UI loop implementing [`HomeExecutor`].
//!
//! Each thread has an *ambient* executor, the one returned by [`current`].
//! Executors install themselves as ambient while they run tasks, and
//! [`enter`] installs one explicitly. [`SyncContext::capture`] snapshots the
//! ambient executor at construction time, so an object built on its home
//! thread routes deferred notifications back there.
//!
//! The ambient slot holds a `Weak` reference: entering an executor never
//! keeps it alive.

mod affinity;
mod home_thread;
mod pump;
mod sync_context;

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::ContextError;

pub use affinity::SyncOperation;
pub use home_thread::{HomeThread, HomeThreadConfig};
pub use pump::MessagePump;
pub use sync_context::{LifecycleFlag, SyncContext};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a home executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    /// Allocate a fresh id. Implementors of [`HomeExecutor`] call this once.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor#{}", self.0)
    }
}

/// Something that runs posted work later, on its own thread or loop.
pub trait HomeExecutor: Send + Sync {
    fn id(&self) -> ExecutorId;

    /// Queue `task` for asynchronous execution.
    ///
    /// Must never run `task` before returning. Fails once the executor has
    /// stopped accepting work; the task is dropped in that case.
    fn post(&self, task: Task) -> Result<(), ContextError>;
}

struct Ambient {
    id: ExecutorId,
    executor: Weak<dyn HomeExecutor>,
}

thread_local! {
    static AMBIENT: RefCell<Option<Ambient>> = const { RefCell::new(None) };
}

/// The calling thread's ambient executor, if one is installed and alive.
#[must_use]
pub fn current() -> Option<Arc<dyn HomeExecutor>> {
    AMBIENT.with(|slot| slot.borrow().as_ref().and_then(|a| a.executor.upgrade()))
}

/// Id of the calling thread's ambient executor, alive or not.
#[must_use]
pub fn current_id() -> Option<ExecutorId> {
    AMBIENT.with(|slot| slot.borrow().as_ref().map(|a| a.id))
}

/// Install `executor` as the calling thread's ambient executor until the
/// returned guard drops. Guards nest; dropping one restores the previous
/// ambient executor.
pub fn enter(executor: &Arc<dyn HomeExecutor>) -> EnterGuard {
    enter_weak(executor.id(), Arc::downgrade(executor))
}

pub(crate) fn enter_weak(id: ExecutorId, executor: Weak<dyn HomeExecutor>) -> EnterGuard {
    let previous = AMBIENT.with(|slot| slot.borrow_mut().replace(Ambient { id, executor }));
    EnterGuard {
        previous,
        _not_send: std::marker::PhantomData,
    }
}

/// Restores the previous ambient executor on drop.
#[must_use = "the ambient executor is reset as soon as the guard is dropped"]
pub struct EnterGuard {
    previous: Option<Ambient>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl fmt::Debug for EnterGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnterGuard")
            .field("previous", &self.previous.as_ref().map(|a| a.id))
            .finish()
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        AMBIENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
