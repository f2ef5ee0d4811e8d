#![forbid(unsafe_code)]

//! Reentrant read-write locking keyed by logical owner.
//!
//! # Design
//!
//! [`ReentrantLock`] is the seam every synchronized object talks to. It hands
//! out scoped guards that release on drop, and lets the owner that already
//! holds an acquisition take it again without deadlocking itself.
//! [`ReentrantRwLock`] is the provided implementation; alternative strategies
//! (spinning, fair queueing) only have to implement the trait.
//!
//! An owner is identified by [`OwnerId`], which is allocated once per OS
//! thread. Guards are `!Send` so an acquisition can never be released by an
//! owner that did not take it.
//!
//! # Re-entry rules
//!
//! | held by current owner | `read()`        | `write()`                      |
//! |-----------------------|-----------------|--------------------------------|
//! | nothing               | blocks/acquires | blocks/acquires                |
//! | read                  | re-enters       | [`LockError::UpgradeDeadlock`] |
//! | write                 | re-enters       | re-enters                      |
//!
//! Under [`RecursionPolicy::NoRecursion`] every re-entry fails with
//! [`LockError::Recursion`].

mod reentrant;

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::LockError;

pub use reentrant::{ReadGuard, ReentrantRwLock, WriteGuard};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_OWNER: Cell<Option<OwnerId>> = const { Cell::new(None) };
}

/// Identity of the logical owner of lock acquisitions (one per thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Owner id of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        CURRENT_OWNER.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let id = Self(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed));
                slot.set(Some(id));
                id
            }
        })
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Whether an owner may acquire a lock it already holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecursionPolicy {
    /// Re-entry is counted and allowed.
    #[default]
    SupportsRecursion,
    /// Re-entry fails with [`LockError::Recursion`].
    NoRecursion,
}

/// A read-write lock that its current owner can re-enter.
pub trait ReentrantLock: Send + Sync {
    type ReadGuard<'a>
    where
        Self: 'a;
    type WriteGuard<'a>
    where
        Self: 'a;

    /// Acquire shared access, blocking while another owner writes.
    fn read(&self) -> Result<Self::ReadGuard<'_>, LockError>;

    /// Acquire exclusive access, blocking while any other owner holds the lock.
    fn write(&self) -> Result<Self::WriteGuard<'_>, LockError>;

    /// Acquire shared access without blocking.
    fn try_read(&self) -> Result<Self::ReadGuard<'_>, LockError>;

    /// Acquire exclusive access without blocking.
    fn try_write(&self) -> Result<Self::WriteGuard<'_>, LockError>;

    /// Acquire shared access, giving up after `timeout`.
    fn try_read_for(&self, timeout: Duration) -> Result<Self::ReadGuard<'_>, LockError>;

    /// Acquire exclusive access, giving up after `timeout`.
    fn try_write_for(&self, timeout: Duration) -> Result<Self::WriteGuard<'_>, LockError>;

    /// Run `f` while holding the read lock.
    fn with_read<R>(&self, f: impl FnOnce() -> R) -> Result<R, LockError> {
        let _guard = self.read()?;
        Ok(f())
    }

    /// Run `f` while holding the write lock.
    fn with_write<R>(&self, f: impl FnOnce() -> R) -> Result<R, LockError> {
        let _guard = self.write()?;
        Ok(f())
    }
}
