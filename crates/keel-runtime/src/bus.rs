//! Typed publish/subscribe event bus.
//!
//! The communication backbone of one agent instance. Delivery is
//! synchronous and in publish order: `publish` invokes every handler
//! subscribed to the event's kind, then every any-kind handler, before
//! returning. Handlers run with the internal lock released, so a handler
//! may publish derived events reentrantly (depth-first delivery).
//!
//! A failing handler is logged and skipped; it never blocks delivery to
//! the handlers after it. After [`EventBus::close`], publishes are logged
//! no-ops returning 0 delivered handlers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use keel_core::events::{Event, EventKind};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A bus handler. Errors are isolated per handler and logged.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct HandlerEntry {
    token: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    closed: bool,
    next_token: u64,
    by_kind: HashMap<EventKind, Vec<HandlerEntry>>,
    any: Vec<HandlerEntry>,
}

/// In-process typed publish/subscribe channel.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create an open bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner::default()),
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe(
        self: &Arc<Self>,
        kind: EventKind,
        handler: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_handler(kind, Arc::new(handler))
    }

    /// Subscribe to every event kind.
    pub fn subscribe_any(
        self: &Arc<Self>,
        handler: impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.register(None, Arc::new(handler))
    }

    /// Subscribe a shared handler to one kind.
    ///
    /// Lets a reactor register the same closure for several kinds without
    /// re-boxing it (see [`keel_core::events::EventKind::STREAM`]).
    pub fn subscribe_handler(self: &Arc<Self>, kind: EventKind, handler: Handler) -> Subscription {
        self.register(Some(kind), handler)
    }

    fn register(self: &Arc<Self>, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let mut inner = self.inner.lock();
        if inner.closed {
            warn!(?kind, "subscribe on closed bus ignored");
            return Subscription {
                bus: Weak::new(),
                token: 0,
            };
        }
        inner.next_token += 1;
        let token = inner.next_token;
        let entry = HandlerEntry { token, handler };
        match kind {
            Some(kind) => inner.by_kind.entry(kind).or_default().push(entry),
            None => inner.any.push(entry),
        }
        Subscription {
            bus: Arc::downgrade(self),
            token,
        }
    }

    /// Publish an event to every matching handler, in subscription order
    /// within a kind, kind handlers before any-kind handlers.
    ///
    /// Returns the number of handlers invoked. On a closed bus this is a
    /// logged no-op returning 0.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock();
            if inner.closed {
                debug!(%kind, "publish on closed bus dropped");
                return 0;
            }
            inner
                .by_kind
                .get(&kind)
                .into_iter()
                .flatten()
                .chain(inner.any.iter())
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };

        for handler in &handlers {
            if let Err(error) = handler(&event) {
                warn!(%kind, %error, "bus handler failed; continuing delivery");
            }
        }
        handlers.len()
    }

    /// Detach every handler and reject further publishes.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.by_kind.clear();
        inner.any.clear();
        debug!("bus closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Total subscribed handlers (all kinds plus any-kind).
    #[must_use]
    pub fn handler_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.by_kind.values().map(Vec::len).sum::<usize>() + inner.any.len()
    }

    fn remove(&self, token: u64) {
        let mut inner = self.inner.lock();
        for entries in inner.by_kind.values_mut() {
            entries.retain(|e| e.token != token);
        }
        inner.any.retain(|e| e.token != token);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsubscribe token returned by the subscribe methods.
///
/// [`unsubscribe`](Subscription::unsubscribe) is idempotent and safe to
/// call after the bus is closed or dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    token: u64,
}

impl Subscription {
    /// Detach the handler this token was issued for.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::events::StreamEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_delta(delta: &str) -> Event {
        Event::stream(StreamEvent::TextDelta {
            index: 0,
            delta: delta.into(),
        })
    }

    fn message_stop() -> Event {
        Event::stream(StreamEvent::MessageStop {
            message_id: "msg_1".into(),
            stop_reason: None,
            usage: None,
        })
    }

    #[test]
    fn publish_reaches_kind_and_any_handlers() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let _s1 = bus.subscribe(EventKind::TextDelta, move |_| {
            let _ = h1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let h2 = Arc::clone(&hits);
        let _s2 = bus.subscribe_any(move |_| {
            let _ = h2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(text_delta("x")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Kind handler does not see other kinds; any handler does.
        assert_eq!(bus.publish(message_stop()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delivery_preserves_publish_order() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = bus.subscribe_any(move |event| {
            s.lock().push(event.kind());
            Ok(())
        });

        let _ = bus.publish(text_delta("a"));
        let _ = bus.publish(message_stop());
        let _ = bus.publish(text_delta("b"));

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::TextDelta,
                EventKind::MessageStop,
                EventKind::TextDelta
            ]
        );
    }

    #[test]
    fn failing_handler_does_not_block_later_handlers() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let _s1 = bus.subscribe(EventKind::TextDelta, |_| anyhow::bail!("handler down"));
        let h = Arc::clone(&hits);
        let _s2 = bus.subscribe(EventKind::TextDelta, move |_| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.publish(text_delta("x")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = bus.subscribe(EventKind::TextDelta, move |_| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let _ = bus.publish(text_delta("a"));
        sub.unsubscribe();
        sub.unsubscribe();
        let _ = bus.publish(text_delta("b"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_close_is_safe() {
        let bus = Arc::new(EventBus::new());
        let sub = bus.subscribe(EventKind::TextDelta, |_| Ok(()));
        bus.close();
        sub.unsubscribe();
    }

    #[test]
    fn publish_after_close_is_noop() {
        let bus = Arc::new(EventBus::new());
        let _sub = bus.subscribe_any(|_| Ok(()));
        bus.close();
        assert!(bus.is_closed());
        assert_eq!(bus.publish(text_delta("x")), 0);
    }

    #[test]
    fn close_detaches_all_handlers() {
        let bus = Arc::new(EventBus::new());
        let _s1 = bus.subscribe(EventKind::TextDelta, |_| Ok(()));
        let _s2 = bus.subscribe_any(|_| Ok(()));
        assert_eq!(bus.handler_count(), 2);
        bus.close();
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn subscribe_after_close_returns_inert_token() {
        let bus = Arc::new(EventBus::new());
        bus.close();
        let sub = bus.subscribe_any(|_| Ok(()));
        assert_eq!(bus.handler_count(), 0);
        sub.unsubscribe();
    }

    #[test]
    fn handler_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let b = Arc::clone(&bus);
        let _s1 = bus.subscribe(EventKind::TextDelta, move |_| {
            let _ = b.publish(message_stop());
            Ok(())
        });
        let s = Arc::clone(&seen);
        let _s2 = bus.subscribe_any(move |event| {
            s.lock().push(event.kind());
            Ok(())
        });

        let _ = bus.publish(text_delta("x"));
        // Depth-first: derived event delivered before the outer publish
        // reaches the any-handler.
        assert_eq!(
            *seen.lock(),
            vec![EventKind::MessageStop, EventKind::TextDelta]
        );
    }

    #[test]
    fn shared_handler_across_kinds() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handler: Handler = Arc::new(move |_| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let subs: Vec<Subscription> = EventKind::STREAM
            .iter()
            .map(|k| bus.subscribe_handler(*k, Arc::clone(&handler)))
            .collect();
        assert_eq!(subs.len(), 8);

        let _ = bus.publish(text_delta("a"));
        let _ = bus.publish(message_stop());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
