//! Typed publish/subscribe bus.
//!
//! Every emitter in the crate ([`Connection`](crate::Connection),
//! [`Session`](crate::Session), [`FrameManager`](crate::FrameManager)) owns an
//! [`EventBus`]. Two kinds of subscribers exist:
//!
//! | Kind | Created by | Delivery |
//! |------|------------|----------|
//! | [`Subscription`] | [`EventBus::subscribe`] | queued, pulled with `recv().await` |
//! | [`Listener`] | [`EventBus::listen`] | handler runs inline on the publishing task |
//!
//! Both handles unregister themselves when dropped, so a disposed waiter can
//! never be called back against freed state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Inline handler callback.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A registered subscriber.
enum Subscriber<E> {
    Channel(mpsc::UnboundedSender<E>),
    Handler(Handler<E>),
}

/// Subscriber table shared between the bus and its handles.
type SubscriberMap<E> = Mutex<FxHashMap<SubscriptionId, Subscriber<E>>>;

// ============================================================================
// EventBus
// ============================================================================

/// Typed event bus with self-unregistering subscriber handles.
pub struct EventBus<E> {
    subscribers: Arc<SubscriberMap<E>>,
    next_id: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(FxHashMap::default())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> EventBus<E> {
    /// Returns the number of registered subscribers of both kinds.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Creates an empty bus.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queued subscriber.
    ///
    /// Events published after this call are buffered until received.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<E> {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, Subscriber::Channel(tx));

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.subscribers),
        }
    }

    /// Registers an inline handler.
    ///
    /// The handler runs on the publishing task, in publish order, outside
    /// the bus lock. It must not block.
    #[must_use]
    pub fn listen<F>(&self, handler: F) -> Listener
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.subscribers
            .lock()
            .insert(id, Subscriber::Handler(Arc::new(handler)));

        let weak: Weak<SubscriberMap<E>> = Arc::downgrade(&self.subscribers);
        Listener {
            id,
            remove: Some(Box::new(move |id| {
                if let Some(subscribers) = weak.upgrade() {
                    subscribers.lock().remove(&id);
                }
            })),
        }
    }

    /// Publishes an event to every live subscriber.
    ///
    /// Queued subscribers whose receiver is gone are pruned.
    pub fn publish(&self, event: E) {
        let mut handlers: Vec<Handler<E>> = Vec::new();
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|id, subscriber| match subscriber {
                Subscriber::Channel(tx) => {
                    let delivered = tx.send(event.clone()).is_ok();
                    if !delivered {
                        trace!(subscription = %id, "Pruning closed subscription");
                    }
                    delivered
                }
                Subscriber::Handler(handler) => {
                    handlers.push(Arc::clone(handler));
                    true
                }
            });
        }

        for handler in handlers {
            handler(&event);
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Queued subscriber handle.
///
/// Dropping it unregisters the subscriber.
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<E>,
    bus: Weak<SubscriberMap<E>>,
}

impl<E> Subscription<E> {
    /// Returns the subscriber ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receives the next event.
    ///
    /// Returns `None` once the bus is dropped or cleared.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Receives an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Explicitly unregisters the subscriber.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(subscribers) = self.bus.upgrade() {
            subscribers.lock().remove(&self.id);
        }
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Inline handler handle.
///
/// Dropping it unregisters the handler.
pub struct Listener {
    id: SubscriptionId,
    remove: Option<Box<dyn FnOnce(SubscriptionId) + Send + Sync>>,
}

impl Listener {
    /// Returns the subscriber ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Explicitly unregisters the handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.id);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_subscribe_receives_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(1u32);
        bus.publish(2u32);

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_drop_unregisters_subscription() {
        let bus: EventBus<u32> = EventBus::new();
        let sub = bus.subscribe();
        let other = bus.subscribe();
        assert_eq!(bus.listener_count(), 2);

        drop(sub);
        assert_eq!(bus.listener_count(), 1);

        other.unsubscribe();
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_runs_inline_and_unregisters() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let listener = bus.listen(move |value: &usize| {
            seen_clone.fetch_add(*value, Ordering::SeqCst);
        });

        bus.publish(3);
        bus.publish(4);
        assert_eq!(seen.load(Ordering::SeqCst), 7);

        drop(listener);
        bus.publish(100);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_subscribe_reentrantly() {
        let bus = Arc::new(EventBus::<u8>::new());
        let bus_clone = Arc::clone(&bus);
        let extra = Arc::new(Mutex::new(Vec::new()));
        let extra_clone = Arc::clone(&extra);

        let _listener = bus.listen(move |_| {
            extra_clone.lock().push(bus_clone.subscribe());
        });

        bus.publish(0);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn test_handle_outlives_bus() {
        let bus: EventBus<u8> = EventBus::new();
        let sub = bus.subscribe();
        let listener = bus.listen(|_| {});
        drop(bus);

        // Must not panic.
        drop(sub);
        drop(listener);
    }

    #[test]
    fn test_debug_reports_listener_count() {
        struct Opaque;

        let bus: EventBus<Opaque> = EventBus::default();
        assert_eq!(format!("{bus:?}"), "EventBus { listeners: 0 }");
    }
}
