#![forbid(unsafe_code)]

//! Error types for lock acquisition and home-executor interaction.

use std::any::Any;

use thiserror::Error;

use crate::context::ExecutorId;

/// Failure to acquire a [`ReentrantLock`](crate::lock::ReentrantLock).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock was built with [`RecursionPolicy::NoRecursion`](crate::lock::RecursionPolicy)
    /// and the current owner already holds it.
    #[error("recursive {mode} acquisition is not allowed by this lock")]
    Recursion { mode: &'static str },

    /// The current owner holds a read lock and asked for the write lock.
    /// Granting it would wait on itself forever.
    #[error("cannot upgrade a held read lock to a write lock")]
    UpgradeDeadlock,

    /// A bounded wait elapsed before the lock became available.
    #[error("timed out waiting for {mode} lock")]
    Timeout { mode: &'static str },

    /// A non-blocking attempt found the lock contended.
    #[error("{mode} lock is currently unavailable")]
    WouldBlock { mode: &'static str },
}

/// Failure to run work on a captured home executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("synchronization context is disposed")]
    Disposed,

    #[error("home executor is no longer alive")]
    ExecutorGone,

    #[error("home executor {0} is shut down")]
    ExecutorClosed(ExecutorId),

    #[error("task panicked on the home executor: {0}")]
    TaskPanicked(String),

    #[error("task was dropped before it ran")]
    Cancelled,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            LockError::UpgradeDeadlock.to_string(),
            "cannot upgrade a held read lock to a write lock"
        );
        assert_eq!(
            LockError::Timeout { mode: "write" }.to_string(),
            "timed out waiting for write lock"
        );
        assert_eq!(
            ContextError::TaskPanicked("boom".into()).to_string(),
            "task panicked on the home executor: boom"
        );
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("boom-str");
        let b: Box<dyn Any + Send> = Box::new(String::from("boom-string"));
        let c: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(a.as_ref()), "boom-str");
        assert_eq!(panic_message(b.as_ref()), "boom-string");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }
}
