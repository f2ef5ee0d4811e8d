#![forbid(unsafe_code)]

use obsync_core::lock::RecursionPolicy;

/// Construction-time settings for an
/// [`ObservableSyncContext`](crate::ObservableSyncContext).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservableConfig {
    /// Defer the Primary channel to the home executor instead of firing it
    /// on the notifying thread. Can be changed later at runtime.
    pub synchronize_primary: bool,
    /// Re-entry rule for the built-in lock.
    pub recursion: RecursionPolicy,
}

impl ObservableConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_synchronize_primary(mut self, synchronize: bool) -> Self {
        self.synchronize_primary = synchronize;
        self
    }

    #[must_use]
    pub fn with_recursion(mut self, recursion: RecursionPolicy) -> Self {
        self.recursion = recursion;
        self
    }
}
