//! Event subscription and fan-out.
//!
//! Handlers are registered per event type, or for every type with
//! [`WILDCARD`]. [`EventBroadcaster::emit`] snapshots the matching handlers
//! under the registry lock and invokes them after releasing it, so a handler
//! may subscribe or unsubscribe without deadlocking.
//!
//! | Order | Handlers |
//! |-------|----------|
//! | 1 | Typed handlers, in registration order |
//! | 2 | Wildcard handlers, in registration order |
//!
//! Events with no handlers are dropped. There is no buffering or replay.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::identifiers::SubscriptionId;
use crate::protocol::Event;

// ============================================================================
// Constants
// ============================================================================

/// Subscribes to every event type.
pub const WILDCARD: &str = "*";

// ============================================================================
// Types
// ============================================================================

/// Event handler callback type.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handlers by event type, each list in registration order.
#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: FxHashMap<String, Vec<(SubscriptionId, EventCallback)>>,
}

impl Registry {
    fn remove(&mut self, event_type: &str, id: SubscriptionId) -> bool {
        let Some(list) = self.handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(event_type);
        }
        removed
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Token returned by [`EventBroadcaster::on`].
///
/// Dropping the token leaves the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: SubscriptionId,
    event_type: String,
    registry: Weak<Mutex<Registry>>,
    active: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Removes the handler. Safe to call any number of times.
    ///
    /// Returns `true` only for the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.lock().remove(&self.event_type, self.id);
        trace!(id = %self.id, event_type = %self.event_type, removed, "Unsubscribed");
        removed
    }

    /// Returns the subscription ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the subscribed event type.
    #[inline]
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns `true` until `unsubscribe` is called.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// ============================================================================
// EventBroadcaster
// ============================================================================

/// Per-connection event handler registry.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventBroadcaster")
            .field("types", &registry.handlers.len())
            .finish()
    }
}

impl EventBroadcaster {
    /// Creates an empty broadcaster.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type` (or [`WILDCARD`]).
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = {
            let mut registry = self.registry.lock();
            registry.next_id += 1;
            let id = SubscriptionId::new(registry.next_id);
            registry
                .handlers
                .entry(event_type.clone())
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        trace!(%id, %event_type, "Subscribed");
        Subscription {
            id,
            event_type,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Invokes every handler matching `event.event_type`.
    ///
    /// A panicking handler is logged and skipped. Returns the number of
    /// handlers invoked.
    pub fn emit(&self, event: &Event) -> usize {
        let snapshot: Vec<(SubscriptionId, EventCallback)> = {
            let registry = self.registry.lock();
            let typed = registry.handlers.get(&event.event_type);
            let wildcard = (event.event_type != WILDCARD)
                .then(|| registry.handlers.get(WILDCARD))
                .flatten();
            typed
                .into_iter()
                .chain(wildcard)
                .flatten()
                .map(|(id, handler)| (*id, Arc::clone(handler)))
                .collect()
        };

        if snapshot.is_empty() {
            trace!(event_type = %event.event_type, source_id = %event.source_id, "Event without handlers dropped");
            return 0;
        }

        for (id, handler) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    subscription = %id,
                    event_type = %event.event_type,
                    "Event handler panicked"
                );
            }
        }
        snapshot.len()
    }

    /// Returns the number of handlers registered for exactly `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.registry
            .lock()
            .handlers
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.registry.lock().handlers.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::payload;
    use crate::protocol::Value;

    fn event(event_type: &str, source: &str) -> Event {
        Event::new(event_type, source, None)
    }

    #[test]
    fn test_typed_then_wildcard_in_registration_order() {
        let broadcaster = EventBroadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| {
            let log = Arc::clone(&log);
            move |_: &Event| log.lock().push(tag)
        };
        let _w = broadcaster.on(WILDCARD, push("wildcard"));
        let _a = broadcaster.on("click", push("a"));
        let _b = broadcaster.on("click", push("b"));
        let _other = broadcaster.on("change", push("other"));

        assert_eq!(broadcaster.emit(&event("click", "btn1")), 3);
        assert_eq!(*log.lock(), ["a", "b", "wildcard"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = EventBroadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = broadcaster.on("click", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        broadcaster.emit(&event("click", "b"));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        broadcaster.emit(&event("click", "b"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.handler_count("click"), 0);
    }

    #[test]
    fn test_drop_does_not_unsubscribe() {
        let broadcaster = EventBroadcaster::new();
        drop(broadcaster.on("click", |_| {}));
        assert_eq!(broadcaster.handler_count("click"), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let broadcaster = EventBroadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let _bad = broadcaster.on("click", |_| panic!("handler bug"));
        let _good = broadcaster.on("click", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(broadcaster.emit(&event("click", "b")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_handlers_drops_event() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.emit(&event("unheard", "x")), 0);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _late = broadcaster.on("unheard", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let broadcaster = EventBroadcaster::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let sub = broadcaster.on("once", move |_| {
            if let Some(sub) = inner.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        assert_eq!(broadcaster.emit(&event("once", "x")), 1);
        assert_eq!(broadcaster.emit(&event("once", "x")), 0);
    }

    #[test]
    fn test_per_source_order_preserved() {
        let broadcaster = EventBroadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = broadcaster.on("tick", move |e: &Event| {
            let seq = e
                .data
                .as_ref()
                .and_then(|d| d.get("seq"))
                .and_then(Value::as_u64);
            sink.lock().push((e.source_id.clone(), seq));
        });

        for seq in 0..50u64 {
            let source = if seq % 3 == 0 { "slider" } else { "spinner" };
            broadcaster.emit(&Event::new("tick", source, Some(payload! { "seq" => seq })));
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 50);
        for source in ["slider", "spinner"] {
            let order: Vec<u64> = seen
                .iter()
                .filter(|(s, _)| s == source)
                .filter_map(|(_, seq)| *seq)
                .collect();
            let expected: Vec<u64> = (0..50u64)
                .filter(|seq| (seq % 3 == 0) == (source == "slider"))
                .collect();
            assert_eq!(order, expected, "{source}");
        }
    }
}
