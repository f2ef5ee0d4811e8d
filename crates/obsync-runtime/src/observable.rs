#![forbid(unsafe_code)]

//! Three-channel change dispatcher.
//!
//! [`ObservableSyncContext`] is the base a synchronized object embeds. It
//! owns the object's lock, the captured [`SyncContext`], and the three
//! subscriber sets, and it runs the fan-out whenever the object reports a
//! change through [`notify`](ObservableSyncContext::notify).
//!
//! # Dispatch order for one `notify`
//!
//! 1. Disposed: return without firing anything.
//! 2. Unsynchronized subscribers, on the calling thread.
//! 3. A deferred task for the Synchronized subscribers is posted home.
//! 4. Primary subscribers: on the calling thread right away, or through a
//!    second deferred task when `synchronize_primary` is set.
//!
//! Deferred tasks look at the lifecycle flag and load the subscriber
//! snapshot when they run, not when they were posted. A task that runs
//! after [`dispose`](ObservableSyncContext::dispose) fires nothing.
//!
//! # Failure Modes
//!
//! | Failure                       | Effect                                                   |
//! |-------------------------------|----------------------------------------------------------|
//! | Handler panics inline         | Unwinds out of `notify`; later handlers on that channel skip this change |
//! | Handler panics on the home executor | Reported by the executor; dispatcher state is untouched |
//! | Home executor gone            | Deferred task dropped with a WARN event                 |
//! | `notify` after `dispose`      | Silent no-op                                             |

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use obsync_core::context::{SyncContext, SyncOperation};
use obsync_core::lock::{ReentrantLock, ReentrantRwLock};

use crate::config::ObservableConfig;
use crate::event::{Channel, ChangeEvent, EventInner};
use crate::notification::PropertyChanged;
use crate::synchronized::SynchronizedObject;

/// Dispatcher base for synchronized objects.
///
/// Generic over the lock so alternative [`ReentrantLock`] implementations
/// can be dropped in without touching the dispatch logic.
pub struct ObservableSyncContext<L: ReentrantLock = ReentrantRwLock> {
    lock: L,
    context: SyncContext,
    unsynchronized: ChangeEvent,
    synchronized: ChangeEvent,
    primary: ChangeEvent,
    synchronize_primary: AtomicBool,
}

impl<L: ReentrantLock> fmt::Debug for ObservableSyncContext<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableSyncContext")
            .field("context", &self.context)
            .field("synchronize_primary", &self.synchronize_primary())
            .field("unsynchronized", &self.unsynchronized.len())
            .field("synchronized", &self.synchronized.len())
            .field("primary", &self.primary.len())
            .finish()
    }
}

impl Default for ObservableSyncContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservableSyncContext {
    /// Capture the calling thread's home executor. Without one, deferred
    /// channels run inline on the notifying thread.
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(SyncContext::capture())
    }

    #[must_use]
    pub fn with_context(context: SyncContext) -> Self {
        Self::with_config(ObservableConfig::default(), context)
    }

    #[must_use]
    pub fn with_config(config: ObservableConfig, context: SyncContext) -> Self {
        let lock = ReentrantRwLock::with_policy(config.recursion);
        Self::with_lock(lock, context, config.synchronize_primary)
    }
}

impl<L: ReentrantLock> ObservableSyncContext<L> {
    /// Build around a caller-supplied lock.
    #[must_use]
    pub fn with_lock(lock: L, context: SyncContext, synchronize_primary: bool) -> Self {
        tracing::debug!(
            executor_id = context.affinity().executor_id().map(|id| id.as_u64()),
            synchronize_primary,
            "observable.created"
        );
        Self {
            lock,
            context,
            unsynchronized: ChangeEvent::new(Channel::Unsynchronized),
            synchronized: ChangeEvent::new(Channel::Synchronized),
            primary: ChangeEvent::new(Channel::Primary),
            synchronize_primary: AtomicBool::new(synchronize_primary),
        }
    }

    /// Publish a change of `property` on all three channels.
    pub fn notify(&self, property: impl Into<PropertyChanged>) {
        self.notify_with(property.into());
    }

    /// Publish a pre-built notification on all three channels.
    pub fn notify_with(&self, args: PropertyChanged) {
        if self.context.is_disposed() {
            return;
        }
        tracing::trace!(property = args.name(), "observable.notify");

        self.unsynchronized.emit(&args);
        self.post_deferred(Channel::Synchronized, self.synchronized.shared(), args.clone());
        if self.synchronize_primary() {
            self.post_deferred(Channel::Primary, self.primary.shared(), args);
        } else {
            self.primary.emit(&args);
        }
    }

    fn post_deferred(&self, channel: Channel, subscribers: Arc<EventInner>, args: PropertyChanged) {
        let lifecycle = self.context.lifecycle().clone();
        self.context.context_post(move || {
            if lifecycle.is_disposed() {
                tracing::trace!(
                    channel = channel.as_str(),
                    property = args.name(),
                    "observable.deferred_after_dispose"
                );
                return;
            }
            subscribers.emit(&args);
        });
    }

    #[inline]
    #[must_use]
    pub fn synchronize_primary(&self) -> bool {
        self.synchronize_primary.load(Ordering::Acquire)
    }

    /// Switch Primary delivery between inline and deferred. Affects
    /// notifications issued after the call.
    pub fn set_synchronize_primary(&self, synchronize: bool) {
        self.synchronize_primary.store(synchronize, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.context.is_disposed()
    }

    #[inline]
    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Stop all delivery and drop every subscriber. Idempotent.
    pub fn dispose(&self) {
        if self.context.begin_dispose() {
            self.teardown(true);
        }
    }

    fn teardown(&self, disposing: bool) {
        self.unsynchronized.clear();
        self.synchronized.clear();
        self.primary.clear();
        self.context.dispose_hook(disposing);
        tracing::debug!(disposing, "observable.disposed");
    }
}

impl<L: ReentrantLock> Drop for ObservableSyncContext<L> {
    fn drop(&mut self) {
        if self.context.begin_dispose() {
            self.teardown(false);
        }
    }
}

impl<L: ReentrantLock> SynchronizedObject for ObservableSyncContext<L> {
    type Lock = L;

    fn synchronized_changed(&self) -> &ChangeEvent {
        &self.synchronized
    }

    fn unsynchronized_changed(&self) -> &ChangeEvent {
        &self.unsynchronized
    }

    fn property_changed(&self) -> &ChangeEvent {
        &self.primary
    }

    fn lock(&self) -> &L {
        &self.lock
    }

    fn affinity(&self) -> &SyncOperation {
        self.context.affinity()
    }
}
