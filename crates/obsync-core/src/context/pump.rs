#![forbid(unsafe_code)]

//! Manually drained home executor.
//!
//! [`MessagePump`] queues posted tasks until the owning loop calls
//! [`run_pending`](MessagePump::run_pending), the shape of a UI message pump.
//! Because nothing runs until it is pumped, it also gives tests full control
//! over when deferred work executes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{ExecutorId, HomeExecutor, Task, enter_weak};
use crate::error::ContextError;

struct PumpShared {
    id: ExecutorId,
    queue: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
}

impl HomeExecutor for PumpShared {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn post(&self, task: Task) -> Result<(), ContextError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ContextError::ExecutorClosed(self.id));
        }
        let mut queue = self.queue.lock();
        queue.push_back(task);
        tracing::trace!(executor_id = self.id.as_u64(), pending = queue.len(), "pump.post");
        Ok(())
    }
}

/// FIFO task queue drained explicitly by its owner.
pub struct MessagePump {
    shared: Arc<PumpShared>,
}

impl std::fmt::Debug for MessagePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePump")
            .field("id", &self.shared.id)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for MessagePump {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePump {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PumpShared {
                id: ExecutorId::next(),
                queue: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ExecutorId {
        self.shared.id
    }

    /// Executor handle to hand to [`SyncContext`](super::SyncContext) or [`enter`](super::enter).
    #[must_use]
    pub fn executor(&self) -> Arc<dyn HomeExecutor> {
        self.shared.clone()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Run queued tasks on the calling thread until the queue is empty,
    /// including tasks posted by the tasks themselves. Returns how many ran.
    ///
    /// The pump is the ambient executor while tasks run. A panicking task
    /// unwinds out of this call; tasks behind it stay queued.
    pub fn run_pending(&self) -> usize {
        let weak = Arc::downgrade(&self.shared);
        let _ambient = enter_weak(self.shared.id, weak);
        let mut ran = 0;
        loop {
            // The queue lock is released before the task runs.
            let next = self.shared.queue.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            ran += 1;
        }
        if ran > 0 {
            tracing::trace!(executor_id = self.shared.id.as_u64(), ran, "pump.drained");
        }
        ran
    }

    /// Run at most one queued task. Returns whether one ran.
    pub fn run_one(&self) -> bool {
        let weak = Arc::downgrade(&self.shared);
        let _ambient = enter_weak(self.shared.id, weak);
        let next = self.shared.queue.lock().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Stop accepting work and drop anything still queued.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let dropped = std::mem::take(&mut *self.shared.queue.lock());
        tracing::debug!(
            executor_id = self.shared.id.as_u64(),
            dropped = dropped.len(),
            "pump.closed"
        );
    }
}
