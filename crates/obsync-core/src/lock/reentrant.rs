#![forbid(unsafe_code)]

//! Condvar-based reentrant read-write lock.
//!
//! # Fairness
//!
//! Writer preference: once a writer is waiting, owners that do not already
//! hold a read acquisition queue behind it. Owners re-entering a read lock
//! they hold are always admitted, otherwise a reader waiting on a writer that
//! waits on the same reader would deadlock. Readers can therefore not starve
//! writers, but a steady stream of writers can starve new readers.

use std::marker::PhantomData;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use web_time::Instant;

use super::{OwnerId, ReentrantLock, RecursionPolicy};
use crate::error::LockError;

#[derive(Debug, Default)]
struct LockState {
    writer: Option<OwnerId>,
    write_depth: usize,
    /// Read depth per owner. Entries are removed when they reach zero.
    readers: AHashMap<OwnerId, usize>,
    waiting_writers: usize,
}

impl LockState {
    fn holds_any(&self, owner: OwnerId) -> bool {
        self.writer == Some(owner) || self.readers.contains_key(&owner)
    }

    fn can_read(&self, owner: OwnerId) -> bool {
        self.holds_any(owner) || (self.writer.is_none() && self.waiting_writers == 0)
    }

    fn can_write(&self, owner: OwnerId) -> bool {
        self.writer == Some(owner) || (self.writer.is_none() && self.readers.is_empty())
    }
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Never,
    Until(Instant),
    Forever,
}

impl Wait {
    fn bounded(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::Until(deadline),
            None => Self::Forever,
        }
    }
}

/// Reentrant read-write lock keyed by [`OwnerId`].
///
/// Each owner carries its own read depth and the writer carries a write
/// depth; the lock is released for other owners once the matching depth
/// drops back to zero.
pub struct ReentrantRwLock {
    state: Mutex<LockState>,
    cond: Condvar,
    policy: RecursionPolicy,
}

impl std::fmt::Debug for ReentrantRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReentrantRwLock")
            .field("policy", &self.policy)
            .field("writer", &state.writer)
            .field("write_depth", &state.write_depth)
            .field("readers", &state.readers.len())
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

impl Default for ReentrantRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantRwLock {
    /// Lock that allows recursive acquisition.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RecursionPolicy::SupportsRecursion)
    }

    #[must_use]
    pub fn with_policy(policy: RecursionPolicy) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            policy,
        }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> RecursionPolicy {
        self.policy
    }

    /// Whether the calling thread currently holds the write lock.
    #[must_use]
    pub fn is_write_locked_by_current(&self) -> bool {
        self.state.lock().writer == Some(OwnerId::current())
    }

    /// Whether any owner holds the write lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Read depth held by the calling thread (0 when it holds none).
    #[must_use]
    pub fn read_depth_of_current(&self) -> usize {
        let owner = OwnerId::current();
        self.state.lock().readers.get(&owner).copied().unwrap_or(0)
    }

    /// Write depth held by the calling thread (0 when it is not the writer).
    #[must_use]
    pub fn write_depth_of_current(&self) -> usize {
        let state = self.state.lock();
        if state.writer == Some(OwnerId::current()) {
            state.write_depth
        } else {
            0
        }
    }

    /// Number of distinct owners holding a read acquisition.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Number of owners blocked waiting for the write lock.
    #[must_use]
    pub fn waiting_writers(&self) -> usize {
        self.state.lock().waiting_writers
    }

    fn acquire_read(&self, wait: Wait) -> Result<ReadGuard<'_>, LockError> {
        let owner = OwnerId::current();
        let mut state = self.state.lock();
        if self.policy == RecursionPolicy::NoRecursion && state.holds_any(owner) {
            return Err(LockError::Recursion { mode: "read" });
        }
        while !state.can_read(owner) {
            self.park(&mut state, wait, "read")?;
        }
        *state.readers.entry(owner).or_insert(0) += 1;
        Ok(ReadGuard {
            lock: self,
            owner,
            _not_send: PhantomData,
        })
    }

    fn acquire_write(&self, wait: Wait) -> Result<WriteGuard<'_>, LockError> {
        let owner = OwnerId::current();
        let mut state = self.state.lock();
        if self.policy == RecursionPolicy::NoRecursion && state.holds_any(owner) {
            return Err(LockError::Recursion { mode: "write" });
        }
        if state.writer != Some(owner) && state.readers.contains_key(&owner) {
            tracing::debug!(owner = owner.as_u64(), "lock.upgrade_rejected");
            return Err(LockError::UpgradeDeadlock);
        }
        if !state.can_write(owner) {
            if let Wait::Never = wait {
                return Err(LockError::WouldBlock { mode: "write" });
            }
            state.waiting_writers += 1;
            let mut outcome = Ok(());
            while !state.can_write(owner) {
                if let Err(err) = self.park(&mut state, wait, "write") {
                    outcome = Err(err);
                    break;
                }
            }
            state.waiting_writers -= 1;
            if let Err(err) = outcome {
                // Readers held back by this writer may proceed now.
                if state.waiting_writers == 0 {
                    self.cond.notify_all();
                }
                return Err(err);
            }
        }
        state.writer = Some(owner);
        state.write_depth += 1;
        Ok(WriteGuard {
            lock: self,
            owner,
            _not_send: PhantomData,
        })
    }

    fn park(
        &self,
        state: &mut MutexGuard<'_, LockState>,
        wait: Wait,
        mode: &'static str,
    ) -> Result<(), LockError> {
        match wait {
            Wait::Never => Err(LockError::WouldBlock { mode }),
            Wait::Forever => {
                self.cond.wait(state);
                Ok(())
            }
            Wait::Until(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout { mode });
                }
                let _ = self.cond.wait_for(state, deadline - now);
                Ok(())
            }
        }
    }

    fn release_read(&self, owner: OwnerId) {
        let mut state = self.state.lock();
        let left = match state.readers.get_mut(&owner) {
            Some(depth) => {
                *depth -= 1;
                *depth == 0
            }
            None => false,
        };
        if left {
            state.readers.remove(&owner);
            self.cond.notify_all();
        }
    }

    fn release_write(&self, owner: OwnerId) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.writer, Some(owner));
        state.write_depth -= 1;
        if state.write_depth == 0 {
            state.writer = None;
            self.cond.notify_all();
        }
    }
}

impl ReentrantLock for ReentrantRwLock {
    type ReadGuard<'a> = ReadGuard<'a>;
    type WriteGuard<'a> = WriteGuard<'a>;

    fn read(&self) -> Result<ReadGuard<'_>, LockError> {
        self.acquire_read(Wait::Forever)
    }

    fn write(&self) -> Result<WriteGuard<'_>, LockError> {
        self.acquire_write(Wait::Forever)
    }

    fn try_read(&self) -> Result<ReadGuard<'_>, LockError> {
        self.acquire_read(Wait::Never)
    }

    fn try_write(&self) -> Result<WriteGuard<'_>, LockError> {
        self.acquire_write(Wait::Never)
    }

    fn try_read_for(&self, timeout: Duration) -> Result<ReadGuard<'_>, LockError> {
        self.acquire_read(Wait::bounded(timeout))
    }

    fn try_write_for(&self, timeout: Duration) -> Result<WriteGuard<'_>, LockError> {
        self.acquire_write(Wait::bounded(timeout))
    }
}

/// Scoped shared acquisition of a [`ReentrantRwLock`].
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a ReentrantRwLock,
    owner: OwnerId,
    _not_send: PhantomData<*const ()>,
}

impl ReadGuard<'_> {
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl std::fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard").field("owner", &self.owner).finish()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read(self.owner);
    }
}

/// Scoped exclusive acquisition of a [`ReentrantRwLock`].
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReentrantRwLock,
    owner: OwnerId,
    _not_send: PhantomData<*const ()>,
}

impl WriteGuard<'_> {
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl std::fmt::Debug for WriteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").field("owner", &self.owner).finish()
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier, mpsc};
    use std::thread;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn read_reenters() {
        let lock = ReentrantRwLock::new();
        let a = lock.read().unwrap();
        let b = lock.read().unwrap();
        assert_eq!(lock.read_depth_of_current(), 2);
        drop(a);
        assert_eq!(lock.read_depth_of_current(), 1);
        drop(b);
        assert_eq!(lock.read_depth_of_current(), 0);
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn write_reenters_and_admits_own_reads() {
        let lock = ReentrantRwLock::new();
        let w1 = lock.write().unwrap();
        let r = lock.read().unwrap();
        let w2 = lock.write().unwrap();
        assert_eq!(lock.write_depth_of_current(), 2);
        assert_eq!(lock.read_depth_of_current(), 1);
        drop(w2);
        drop(r);
        assert!(lock.is_write_locked_by_current());
        drop(w1);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn read_to_write_upgrade_is_rejected() {
        let lock = ReentrantRwLock::new();
        let _r = lock.read().unwrap();
        assert_eq!(lock.write().unwrap_err(), LockError::UpgradeDeadlock);
        assert_eq!(lock.waiting_writers(), 0);
    }

    #[test]
    fn released_write_with_held_read_is_a_downgrade() {
        let lock = ReentrantRwLock::new();
        let w = lock.write().unwrap();
        let r = lock.read().unwrap();
        drop(w);
        assert!(!lock.is_write_locked());
        assert_eq!(lock.read_depth_of_current(), 1);
        assert_eq!(lock.write().unwrap_err(), LockError::UpgradeDeadlock);
        drop(r);
        assert!(lock.write().is_ok());
    }

    #[test]
    fn no_recursion_policy_rejects_reentry() {
        let lock = ReentrantRwLock::with_policy(RecursionPolicy::NoRecursion);
        let r = lock.read().unwrap();
        assert_eq!(
            lock.read().unwrap_err(),
            LockError::Recursion { mode: "read" }
        );
        drop(r);
        let _w = lock.write().unwrap();
        assert_eq!(
            lock.write().unwrap_err(),
            LockError::Recursion { mode: "write" }
        );
        assert_eq!(
            lock.read().unwrap_err(),
            LockError::Recursion { mode: "read" }
        );
    }

    #[test]
    fn write_excludes_other_owner() {
        let lock = Arc::new(ReentrantRwLock::new());
        let guard = lock.write().unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _w = lock.write().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        wait_until(|| lock.waiting_writers() == 1);
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn readers_share_across_owners() {
        let lock = Arc::new(ReentrantRwLock::new());
        let barrier = Arc::new(Barrier::new(2));
        let _mine = lock.read().unwrap();

        let handle = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _theirs = lock.try_read().unwrap();
                barrier.wait();
                barrier.wait();
            })
        };

        barrier.wait();
        assert_eq!(lock.reader_count(), 2);
        barrier.wait();
        handle.join().unwrap();
        assert_eq!(lock.reader_count(), 1);
    }

    #[test]
    fn try_write_reports_contention() {
        let lock = Arc::new(ReentrantRwLock::new());
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let handle = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _r = lock.read().unwrap();
                held_tx.send(()).unwrap();
                let _ = release_rx.recv();
            })
        };

        held_rx.recv().unwrap();
        assert_eq!(
            lock.try_write().unwrap_err(),
            LockError::WouldBlock { mode: "write" }
        );
        assert_eq!(
            lock.try_write_for(Duration::from_millis(20)).unwrap_err(),
            LockError::Timeout { mode: "write" }
        );
        assert_eq!(lock.waiting_writers(), 0);
        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(lock.try_write().is_ok());
    }

    #[test]
    fn waiting_writer_holds_back_new_readers() {
        let lock = Arc::new(ReentrantRwLock::new());
        let first_read = lock.read().unwrap();

        let writer = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _w = lock.write().unwrap();
            })
        };
        wait_until(|| lock.waiting_writers() == 1);

        let other_reader = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.try_read().map(|_| ()))
        };
        assert_eq!(
            other_reader.join().unwrap().unwrap_err(),
            LockError::WouldBlock { mode: "read" }
        );

        // Re-entry by an existing reader is still admitted.
        let again = lock.read().unwrap();
        drop(again);
        drop(first_read);
        writer.join().unwrap();
        assert!(lock.try_read().is_ok());
    }

    #[test]
    fn timed_out_writer_releases_queued_readers() {
        let lock = Arc::new(ReentrantRwLock::new());
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let _r = lock.read().unwrap();
                held_tx.send(()).unwrap();
                let _ = release_rx.recv();
            })
        };
        held_rx.recv().unwrap();

        assert!(lock.try_write_for(Duration::from_millis(10)).is_err());
        assert!(lock.try_read_for(Duration::from_millis(100)).is_ok());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn with_helpers_scope_the_guard() {
        let lock = ReentrantRwLock::new();
        let depth = lock.with_write(|| lock.write_depth_of_current()).unwrap();
        assert_eq!(depth, 1);
        assert!(!lock.is_write_locked());
        let depth = lock.with_read(|| lock.read_depth_of_current()).unwrap();
        assert_eq!(depth, 1);
        assert_eq!(lock.reader_count(), 0);
    }
}
