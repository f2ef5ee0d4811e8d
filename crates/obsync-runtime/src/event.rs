#![forbid(unsafe_code)]

//! Thread-safe subscriber sets for one notification channel.
//!
//! # Design
//!
//! [`ChangeEvent`] keeps its handlers in an immutable `Vec` behind an
//! `ArcSwap`. Subscribing or unsubscribing builds a new `Vec` and swaps it
//! in; dispatch loads the current snapshot and iterates it without holding
//! any lock. Handlers may therefore subscribe, unsubscribe, or emit again
//! from inside a callback, and concurrent mutation never disturbs an
//! iteration already in progress.
//!
//! # Invariants
//!
//! 1. Handlers of one emission run in registration order.
//! 2. A handler removed before an emission loads its snapshot is not called
//!    by that emission.
//! 3. A panicking handler unwinds out of [`emit`](ChangeEvent::emit); the
//!    handlers behind it are skipped for that emission only.
//!
//! # Performance
//!
//! | Operation       | Complexity                  |
//! |-----------------|-----------------------------|
//! | `emit()`        | O(S) where S = subscribers  |
//! | `subscribe()`   | O(S) copy-on-write          |
//! | `unsubscribe()` | O(S) copy-on-write          |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use crate::notification::PropertyChanged;

/// Callback invoked with each change notification.
pub type Handler = Arc<dyn Fn(&PropertyChanged) + Send + Sync>;

/// One of the three independent delivery paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Runs synchronously on the thread that produced the change.
    Unsynchronized,
    /// Always deferred to the home executor.
    Synchronized,
    /// The conventional change event; immediate or deferred by policy.
    Primary,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsynchronized => "unsynchronized",
            Self::Synchronized => "synchronized",
            Self::Primary => "primary",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token identifying one registration on one [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    handler: Handler,
}

pub(crate) struct EventInner {
    channel: Channel,
    subscribers: ArcSwap<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventInner {
    fn insert(&self, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { id, handler };
        self.subscribers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(entry.clone());
            next
        });
        tracing::trace!(channel = self.channel.as_str(), id = id.0, "event.subscribe");
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let previous = self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|e| e.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|e| e.id == id);
        if removed {
            tracing::trace!(channel = self.channel.as_str(), id = id.0, "event.unsubscribe");
        }
        removed
    }

    /// Invoke every handler of the current snapshot, in order.
    pub(crate) fn emit(&self, args: &PropertyChanged) {
        let snapshot = self.subscribers.load_full();
        if snapshot.is_empty() {
            return;
        }
        tracing::trace!(
            channel = self.channel.as_str(),
            property = args.name(),
            subscribers = snapshot.len(),
            "event.emit"
        );
        for entry in snapshot.iter() {
            (entry.handler)(args);
        }
    }

    fn clear(&self) {
        self.subscribers.store(Arc::new(Vec::new()));
    }
}

/// Ordered, internally synchronized set of handlers for one channel.
pub struct ChangeEvent {
    inner: Arc<EventInner>,
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("channel", &self.inner.channel)
            .field("subscribers", &self.len())
            .finish()
    }
}

impl ChangeEvent {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Arc::new(EventInner {
                channel,
                subscribers: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.inner.channel
    }

    /// Register `handler` at the end of the delivery order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PropertyChanged) + Send + Sync + 'static,
    {
        self.inner.insert(Arc::new(handler))
    }

    /// Register an already shared handler. The same handler may be
    /// registered on several channels.
    pub fn subscribe_handler(&self, handler: Handler) -> SubscriptionId {
        self.inner.insert(handler)
    }

    /// Register `handler` for as long as the returned guard lives.
    pub fn subscribe_scoped<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PropertyChanged) + Send + Sync + 'static,
    {
        let id = self.subscribe(handler);
        Subscription {
            id,
            event: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Remove a registration. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.subscribers.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every registered handler on the calling thread.
    pub fn emit(&self, args: &PropertyChanged) {
        self.inner.emit(args);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Shared handle for deferred emission from another thread.
    pub(crate) fn shared(&self) -> Arc<EventInner> {
        Arc::clone(&self.inner)
    }
}

/// RAII registration: dropping it unsubscribes the handler.
#[must_use = "dropping a Subscription unsubscribes its handler immediately"]
pub struct Subscription {
    id: SubscriptionId,
    event: Option<Weak<EventInner>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.event.is_some())
            .finish()
    }
}

impl Subscription {
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Keep the handler registered past the guard; returns its id.
    pub fn detach(mut self) -> SubscriptionId {
        self.event = None;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.event.take().and_then(|weak| weak.upgrade()) {
            inner.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn push(&self, s: String) {
            self.0.lock().unwrap().push(s);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn tagged(rec: &Recorder, tag: &'static str) -> impl Fn(&PropertyChanged) + Send + Sync + 'static {
        let rec = rec.clone();
        move |args| rec.push(format!("{tag}:{}", args.name()))
    }

    #[test]
    fn emits_in_registration_order() {
        let event = ChangeEvent::new(Channel::Primary);
        let rec = Recorder::default();
        event.subscribe(tagged(&rec, "a"));
        event.subscribe(tagged(&rec, "b"));
        event.subscribe(tagged(&rec, "c"));
        event.emit(&"X".into());
        assert_eq!(rec.take(), vec!["a:X", "b:X", "c:X"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let event = ChangeEvent::new(Channel::Primary);
        let rec = Recorder::default();
        let a = event.subscribe(tagged(&rec, "a"));
        event.subscribe(tagged(&rec, "b"));
        assert!(event.unsubscribe(a));
        assert!(!event.unsubscribe(a));
        event.emit(&"X".into());
        assert_eq!(rec.take(), vec!["b:X"]);
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn same_handler_on_two_events_fires_per_event() {
        let one = ChangeEvent::new(Channel::Primary);
        let two = ChangeEvent::new(Channel::Unsynchronized);
        let rec = Recorder::default();
        let shared: Handler = Arc::new(tagged(&rec, "h"));
        one.subscribe_handler(Arc::clone(&shared));
        two.subscribe_handler(shared);
        one.emit(&"A".into());
        assert_eq!(rec.take(), vec!["h:A"]);
        two.emit(&"B".into());
        assert_eq!(rec.take(), vec!["h:B"]);
    }

    #[test]
    fn scoped_subscription_unsubscribes_on_drop() {
        let event = ChangeEvent::new(Channel::Synchronized);
        let rec = Recorder::default();
        let guard = event.subscribe_scoped(tagged(&rec, "g"));
        event.emit(&"1".into());
        drop(guard);
        event.emit(&"2".into());
        assert_eq!(rec.take(), vec!["g:1"]);
        assert!(event.is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let event = ChangeEvent::new(Channel::Primary);
        let rec = Recorder::default();
        let id = event.subscribe_scoped(tagged(&rec, "d")).detach();
        event.emit(&"1".into());
        assert_eq!(rec.take(), vec!["d:1"]);
        assert!(event.unsubscribe(id));
    }

    #[test]
    fn subscription_outliving_event_is_inert() {
        let event = ChangeEvent::new(Channel::Primary);
        let guard = event.subscribe_scoped(|_| {});
        drop(event);
        drop(guard);
    }

    #[test]
    fn mutation_during_emit_affects_next_emission_only() {
        let event = Arc::new(ChangeEvent::new(Channel::Primary));
        let rec = Recorder::default();
        {
            let event2 = Arc::clone(&event);
            let rec2 = rec.clone();
            event.subscribe(move |args| {
                rec2.push(format!("adder:{}", args.name()));
                event2.subscribe(tagged(&rec2, "late"));
            });
        }
        event.emit(&"1".into());
        assert_eq!(rec.take(), vec!["adder:1"]);
        event.emit(&"2".into());
        assert_eq!(rec.take(), vec!["adder:2", "late:2"]);
    }

    #[test]
    fn panicking_handler_skips_later_handlers_for_that_emission() {
        let event = ChangeEvent::new(Channel::Unsynchronized);
        let rec = Recorder::default();
        event.subscribe(tagged(&rec, "first"));
        event.subscribe(|args| {
            if args.name() == "bad" {
                panic!("handler fault");
            }
        });
        event.subscribe(tagged(&rec, "last"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            event.emit(&"bad".into());
        }));
        assert!(result.is_err());
        assert_eq!(rec.take(), vec!["first:bad"]);

        event.emit(&"good".into());
        assert_eq!(rec.take(), vec!["first:good", "last:good"]);
    }

    #[test]
    fn clear_removes_everything() {
        let event = ChangeEvent::new(Channel::Primary);
        event.subscribe(|_| {});
        event.subscribe(|_| {});
        event.clear();
        assert!(event.is_empty());
        assert_eq!(event.channel(), Channel::Primary);
        assert_eq!(Channel::Primary.to_string(), "primary");
    }
}
