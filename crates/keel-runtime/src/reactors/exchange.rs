//! Exchange tracker — per-round-trip analytics.
//!
//! An exchange opens when the user message for it is published, captures
//! the serving model from `message_start`, accumulates usage from every
//! `message_stop` (multi-message tool turns report usage per message), and
//! closes on the turn's terminal state transition. Aborted exchanges are
//! discarded at destroy without emitting anything.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use keel_core::events::{
    AgentState, Event, EventKind, EventPayload, ExchangeEvent, StateEvent, StreamEvent,
};
use keel_core::ids::ExchangeId;
use keel_core::messages::{Message, TokenUsage};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bus::{EventBus, Handler, Subscription};
use crate::pricing;
use crate::reactor::Reactor;

struct OpenExchange {
    exchange_id: ExchangeId,
    started: Instant,
    model: Option<String>,
    usage: TokenUsage,
}

/// Reactor deriving one [`ExchangeEvent`] per completed round trip.
pub struct ExchangeTracker {
    bus: Arc<EventBus>,
    open: Mutex<Option<OpenExchange>>,
}

impl ExchangeTracker {
    /// Create a tracker with no open exchange.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            open: Mutex::new(None),
        }
    }

    fn on_event(&self, event: &Event) {
        let completed = {
            let mut open = self.open.lock();
            match &event.payload {
                EventPayload::Message(m) => {
                    if let Message::User { exchange_id, .. } = &m.message {
                        if let Some(previous) = open.take() {
                            debug!(
                                exchange_id = %previous.exchange_id,
                                "new exchange opened before the previous closed; discarding"
                            );
                        }
                        *open = Some(OpenExchange {
                            exchange_id: *exchange_id,
                            started: Instant::now(),
                            model: None,
                            usage: TokenUsage::default(),
                        });
                    }
                    None
                }
                EventPayload::Stream(StreamEvent::MessageStart { model, .. }) => {
                    if let (Some(exchange), Some(model)) = (open.as_mut(), model) {
                        exchange.model = Some(model.clone());
                    }
                    None
                }
                EventPayload::Stream(StreamEvent::MessageStop {
                    usage: Some(usage), ..
                }) => {
                    if let Some(exchange) = open.as_mut() {
                        exchange.usage.add(usage);
                    }
                    None
                }
                EventPayload::State(StateEvent::Changed { to, .. })
                    if matches!(to, AgentState::ConversationEnd | AgentState::Error) =>
                {
                    open.take().map(|exchange| {
                        let cost = exchange
                            .model
                            .as_deref()
                            .and_then(|model| pricing::compute_cost(model, &exchange.usage));
                        ExchangeEvent {
                            exchange_id: exchange.exchange_id,
                            duration_ms: duration_ms(exchange.started),
                            usage: exchange.usage,
                            cost,
                            model: exchange.model,
                        }
                    })
                }
                _ => None,
            }
        };

        if let Some(exchange) = completed {
            info!(
                exchange_id = %exchange.exchange_id,
                duration_ms = exchange.duration_ms,
                tokens = exchange.usage.total(),
                "exchange completed"
            );
            let _ = self.bus.publish(Event::exchange(exchange));
        }
    }
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Reactor for ExchangeTracker {
    fn name(&self) -> &'static str {
        "exchange_tracker"
    }

    fn attach(self: Arc<Self>, bus: &Arc<EventBus>) -> Vec<Subscription> {
        let me = Arc::clone(&self);
        let handler: Handler = Arc::new(move |event| {
            me.on_event(event);
            Ok(())
        });
        [
            EventKind::Message,
            EventKind::MessageStart,
            EventKind::MessageStop,
            EventKind::StateChanged,
        ]
        .iter()
        .map(|kind| bus.subscribe_handler(*kind, Arc::clone(&handler)))
        .collect()
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        if let Some(dropped) = self.open.lock().take() {
            debug!(exchange_id = %dropped.exchange_id, "destroy; open exchange discarded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::collect_exchanges;
    use keel_core::ids::MessageId;

    fn attached(bus: &Arc<EventBus>) -> Arc<ExchangeTracker> {
        let tracker = Arc::new(ExchangeTracker::new(Arc::clone(bus)));
        let _subs = Arc::clone(&tracker).attach(bus);
        tracker
    }

    fn open_exchange(bus: &Arc<EventBus>) -> ExchangeId {
        let exchange_id = ExchangeId::new();
        let _ = bus.publish(Event::message(Message::User {
            id: MessageId::new(),
            exchange_id,
            text: "hi".into(),
        }));
        exchange_id
    }

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            ..TokenUsage::default()
        }
    }

    #[tokio::test]
    async fn completed_turn_emits_one_exchange_event() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let _tracker = attached(&bus);

        let exchange_id = open_exchange(&bus);
        let _ = bus.publish(Event::stream(StreamEvent::MessageStart {
            message_id: "msg_1".into(),
            model: Some("claude-sonnet-4-5".into()),
        }));
        let _ = bus.publish(Event::stream(StreamEvent::MessageStop {
            message_id: "msg_1".into(),
            stop_reason: Some("end_turn".into()),
            usage: Some(usage(100, 50)),
        }));
        let _ = bus.publish(Event::state(
            AgentState::Responding,
            AgentState::ConversationEnd,
        ));

        let exchanges = exchanges.lock();
        assert_eq!(exchanges.len(), 1);
        let e = &exchanges[0];
        assert_eq!(e.exchange_id, exchange_id);
        assert_eq!(e.usage.input_tokens, 100);
        assert_eq!(e.usage.output_tokens, 50);
        assert_eq!(e.model.as_deref(), Some("claude-sonnet-4-5"));
        assert!(e.cost.is_some());
    }

    #[tokio::test]
    async fn usage_accumulates_across_messages() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let _tracker = attached(&bus);

        let _id = open_exchange(&bus);
        for (id, input, output) in [("msg_1", 100, 30), ("msg_2", 140, 60)] {
            let _ = bus.publish(Event::stream(StreamEvent::MessageStop {
                message_id: id.into(),
                stop_reason: None,
                usage: Some(usage(input, output)),
            }));
        }
        let _ = bus.publish(Event::state(
            AgentState::Responding,
            AgentState::ConversationEnd,
        ));

        let exchanges = exchanges.lock();
        assert_eq!(exchanges[0].usage.input_tokens, 240);
        assert_eq!(exchanges[0].usage.output_tokens, 90);
    }

    #[tokio::test]
    async fn error_terminal_also_closes_the_exchange() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let _tracker = attached(&bus);

        let exchange_id = open_exchange(&bus);
        let _ = bus.publish(Event::state(AgentState::Thinking, AgentState::Error));

        let exchanges = exchanges.lock();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].exchange_id, exchange_id);
        assert!(exchanges[0].cost.is_none());
    }

    #[tokio::test]
    async fn unknown_model_reports_no_cost() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let _tracker = attached(&bus);

        let _id = open_exchange(&bus);
        let _ = bus.publish(Event::stream(StreamEvent::MessageStart {
            message_id: "msg_1".into(),
            model: Some("experimental-model-x".into()),
        }));
        let _ = bus.publish(Event::stream(StreamEvent::MessageStop {
            message_id: "msg_1".into(),
            stop_reason: None,
            usage: Some(usage(10, 5)),
        }));
        let _ = bus.publish(Event::state(
            AgentState::Responding,
            AgentState::ConversationEnd,
        ));

        let exchanges = exchanges.lock();
        assert!(exchanges[0].cost.is_none());
        assert_eq!(exchanges[0].model.as_deref(), Some("experimental-model-x"));
    }

    #[tokio::test]
    async fn terminal_without_open_exchange_emits_nothing() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let _tracker = attached(&bus);

        let _ = bus.publish(Event::state(
            AgentState::Responding,
            AgentState::ConversationEnd,
        ));
        assert!(exchanges.lock().is_empty());
    }

    #[tokio::test]
    async fn destroy_discards_open_exchange() {
        let bus = Arc::new(EventBus::new());
        let exchanges = collect_exchanges(&bus);
        let tracker = attached(&bus);

        let _id = open_exchange(&bus);
        tracker.destroy().await.unwrap();
        let _ = bus.publish(Event::state(
            AgentState::Responding,
            AgentState::ConversationEnd,
        ));

        assert!(exchanges.lock().is_empty());
    }
}
