#![forbid(unsafe_code)]

//! Runtime: change notifications, subscriber sets, and the three-channel
//! dispatcher synchronized objects are built on.
//!
//! # Example
//!
//! ```
//! use obsync_core::context::{MessagePump, SyncContext};
//! use obsync_runtime::{ObservableSyncContext, SynchronizedObject};
//!
//! let pump = MessagePump::new();
//! let obs = ObservableSyncContext::with_context(SyncContext::bound(&pump.executor()));
//! obs.property_changed().subscribe(|args| println!("{args} changed"));
//! obs.synchronized_changed().subscribe(|args| println!("{args} changed (home)"));
//!
//! obs.notify("Count");
//! assert_eq!(pump.run_pending(), 1);
//! ```

pub mod config;
pub mod event;
pub mod notification;
pub mod observable;
pub mod synchronized;

pub use config::ObservableConfig;
pub use event::{ChangeEvent, Channel, Handler, Subscription, SubscriptionId};
pub use notification::PropertyChanged;
pub use observable::ObservableSyncContext;
pub use synchronized::SynchronizedObject;
