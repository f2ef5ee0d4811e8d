#![forbid(unsafe_code)]

//! obsync public facade crate.
//!
//! Re-exports the stable surface of the workspace crates.

pub use obsync_core::context::{
    HomeExecutor, HomeThread, HomeThreadConfig, MessagePump, SyncContext, SyncOperation,
};
pub use obsync_core::lock::{RecursionPolicy, ReentrantLock, ReentrantRwLock};
pub use obsync_core::{ContextError, LockError};
pub use obsync_runtime::{
    ChangeEvent, ObservableConfig, ObservableSyncContext, PropertyChanged, Subscription,
    SubscriptionId, SynchronizedObject,
};

pub mod prelude {
    pub use obsync_core as core;
    pub use obsync_runtime as runtime;

    pub use obsync_core::lock::ReentrantLock;
    pub use obsync_runtime::SynchronizedObject;
}
