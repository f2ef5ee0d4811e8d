#![forbid(unsafe_code)]

//! Core: reentrant read-write locking, home executors, and context capture.
//!
//! These are the collaborators a synchronized object leans on. The lock
//! guards its state; the captured [`SyncContext`](context::SyncContext)
//! decides where deferred notifications run.

pub mod context;
pub mod error;
pub mod lock;

pub use error::{ContextError, LockError};
