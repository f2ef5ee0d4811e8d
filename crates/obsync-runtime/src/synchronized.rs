#![forbid(unsafe_code)]

//! The capability set every synchronized object exposes.

use obsync_core::context::SyncOperation;
use obsync_core::lock::ReentrantLock;

use crate::event::ChangeEvent;

/// An object whose state is guarded by a re-entrant lock and whose changes
/// are published on three channels.
///
/// | Channel                                   | Runs on                              |
/// |-------------------------------------------|--------------------------------------|
/// | [`unsynchronized_changed`](Self::unsynchronized_changed) | the notifying thread, synchronously |
/// | [`synchronized_changed`](Self::synchronized_changed)     | the home executor, later            |
/// | [`property_changed`](Self::property_changed)             | either, depending on policy         |
pub trait SynchronizedObject {
    type Lock: ReentrantLock;

    fn synchronized_changed(&self) -> &ChangeEvent;

    fn unsynchronized_changed(&self) -> &ChangeEvent;

    /// The conventional change event (Primary channel).
    fn property_changed(&self) -> &ChangeEvent;

    /// Lock guarding the object's state. The same instance for the object's
    /// whole lifetime.
    fn lock(&self) -> &Self::Lock;

    /// Home-executor affinity captured at construction.
    fn affinity(&self) -> &SyncOperation;
}
