#![forbid(unsafe_code)]

//! Dedicated home thread.
//!
//! [`HomeThread`] owns one OS thread that drains a FIFO queue of posted
//! tasks. It is the ambient executor on that thread, so objects constructed
//! from a task running there capture it automatically.
//!
//! # Ordering
//!
//! Tasks run one at a time in the order they were enqueued. Tasks posted from
//! one thread therefore run in submission order; tasks from different threads
//! interleave in whatever order they reached the queue.
//!
//! # Panics
//!
//! A panicking task is reported through `tracing` at ERROR level and the loop
//! moves on to the next task.
//!
//! # Shutdown
//!
//! [`HomeThread::shutdown`] stops accepting work, runs every task already
//! queued, then joins the thread. Dropping the handle does the same.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak, mpsc};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use super::{ExecutorId, HomeExecutor, Task, enter_weak};
use crate::error::{ContextError, panic_message};

/// Configuration for a [`HomeThread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeThreadConfig {
    /// OS thread name.
    pub name: String,
}

impl Default for HomeThreadConfig {
    fn default() -> Self {
        Self {
            name: "obsync-home".into(),
        }
    }
}

impl HomeThreadConfig {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

enum HomeMsg {
    Run(Task),
    Shutdown,
}

struct HomeShared {
    id: ExecutorId,
    /// `None` once stopped. Posting and stopping both hold this lock, so
    /// every accepted task is queued ahead of `Shutdown`.
    sender: Mutex<Option<mpsc::Sender<HomeMsg>>>,
}

impl HomeShared {
    fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl HomeExecutor for HomeShared {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn post(&self, task: Task) -> Result<(), ContextError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(ContextError::ExecutorClosed(self.id));
        };
        tx.send(HomeMsg::Run(task))
            .map_err(|_| ContextError::ExecutorClosed(self.id))?;
        drop(sender);
        tracing::trace!(executor_id = self.id.as_u64(), "home.post");
        Ok(())
    }
}

/// Handle to a running home thread.
pub struct HomeThread {
    shared: Arc<HomeShared>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HomeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeThread")
            .field("id", &self.shared.id)
            .field("thread_id", &self.thread_id)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl HomeThread {
    /// Spawn a home thread with default configuration.
    pub fn start() -> io::Result<Self> {
        Self::with_config(HomeThreadConfig::default())
    }

    pub fn with_config(config: HomeThreadConfig) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<HomeMsg>();
        let shared = Arc::new(HomeShared {
            id: ExecutorId::next(),
            sender: Mutex::new(Some(tx)),
        });
        let weak = Arc::downgrade(&shared);
        let weak: Weak<dyn HomeExecutor> = weak;
        let id = shared.id;

        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || home_loop(id, weak, rx))?;
        let thread_id = handle.thread().id();
        tracing::debug!(executor_id = id.as_u64(), name = %config.name, "home.started");

        Ok(Self {
            shared,
            thread_id,
            handle: Some(handle),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ExecutorId {
        self.shared.id
    }

    /// OS thread the tasks run on.
    #[inline]
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Executor handle to hand to [`SyncContext`](super::SyncContext) or [`enter`](super::enter).
    #[must_use]
    pub fn executor(&self) -> Arc<dyn HomeExecutor> {
        self.shared.clone()
    }

    /// Stop accepting work, run what is already queued, and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shared.sender.lock().take() {
            let _ = tx.send(HomeMsg::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            // Joining from the home thread itself would wait forever.
            if thread::current().id() == self.thread_id {
                return;
            }
            let _ = handle.join();
            tracing::debug!(executor_id = self.shared.id.as_u64(), "home.stopped");
        }
    }
}

impl Drop for HomeThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn home_loop(id: ExecutorId, weak: Weak<dyn HomeExecutor>, rx: mpsc::Receiver<HomeMsg>) {
    let _ambient = enter_weak(id, weak);
    while let Ok(msg) = rx.recv() {
        match msg {
            HomeMsg::Run(task) => run_task(id, task),
            HomeMsg::Shutdown => break,
        }
    }
}

fn run_task(id: ExecutorId, task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            executor_id = id.as_u64(),
            panic = %panic_message(payload.as_ref()),
            "home task panicked"
        );
    }
}
