//! State machine — derives agent lifecycle state from stream events.
//!
//! Transitions are driven purely by Stream-layer events; every accepted
//! transition publishes exactly one State-layer event carrying old/new
//! state. Unknown or out-of-order stream events are logged and skipped —
//! the machine never gets stuck and never fails on malformed input.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::events::{AgentState, Event, EventKind, EventPayload, StreamEvent};
use parking_lot::Mutex;
use tracing::debug;

use crate::bus::{EventBus, Handler, Subscription};
use crate::reactor::Reactor;

struct StateInner {
    state: AgentState,
    /// Tool call ids seen started but not yet resolved.
    pending_tools: HashSet<String>,
}

/// Reactor deriving the agent's conversation state.
pub struct StateMachine {
    bus: Arc<EventBus>,
    inner: Mutex<StateInner>,
}

impl StateMachine {
    /// Create a state machine in `Initializing`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: Mutex::new(StateInner {
                state: AgentState::Initializing,
                pending_tools: HashSet::new(),
            }),
        }
    }

    /// The current state (for inspection; subscribers should consume
    /// state events instead).
    #[must_use]
    pub fn current_state(&self) -> AgentState {
        self.inner.lock().state
    }

    fn on_stream(&self, event: &StreamEvent) {
        // Compute transitions under the lock, publish after releasing it:
        // handlers downstream may inspect this reactor reentrantly.
        let transitions = {
            let mut inner = self.inner.lock();
            plan_transitions(&mut inner, event)
        };
        for (from, to) in transitions {
            let _ = self.bus.publish(Event::state(from, to));
        }
    }
}

/// The transition table. Returns the (possibly multi-step) transition
/// sequence for one stream event, mutating current state as it goes.
fn plan_transitions(
    inner: &mut StateInner,
    event: &StreamEvent,
) -> Vec<(AgentState, AgentState)> {
    let mut steps = Vec::new();
    let mut advance = |inner: &mut StateInner, to: AgentState| {
        steps.push((inner.state, to));
        inner.state = to;
    };

    match event {
        StreamEvent::MessageStart { .. } => match inner.state {
            AgentState::Ready | AgentState::ConversationEnd | AgentState::Error => {
                advance(inner, AgentState::ConversationStart);
                advance(inner, AgentState::Thinking);
            }
            state => debug!(?state, "message_start ignored in this state"),
        },

        StreamEvent::TextDelta { .. } => match inner.state {
            AgentState::ConversationStart
            | AgentState::Thinking
            | AgentState::ToolCompleted
            | AgentState::ToolFailed => advance(inner, AgentState::Responding),
            AgentState::Responding => {}
            state => debug!(?state, "text_delta ignored in this state"),
        },

        StreamEvent::ToolCallStart { tool_call_id, .. } => match inner.state {
            AgentState::Ready
            | AgentState::ConversationStart
            | AgentState::Thinking
            | AgentState::Responding
            | AgentState::ToolExecuting
            | AgentState::ToolCompleted
            | AgentState::ToolFailed => {
                let _ = inner.pending_tools.insert(tool_call_id.clone());
                advance(inner, AgentState::ToolPlanned);
            }
            state => debug!(?state, tool_call_id, "tool_call_start ignored in this state"),
        },

        // No transition; the block is still being constructed.
        StreamEvent::ToolCallDelta { .. } => {}

        StreamEvent::ToolCallStop { tool_call_id, .. } => {
            if inner.state == AgentState::ToolPlanned
                && inner.pending_tools.contains(tool_call_id)
            {
                advance(inner, AgentState::ToolExecuting);
            } else {
                debug!(
                    state = ?inner.state,
                    tool_call_id, "tool_call_stop with no planned tool; ignored"
                );
            }
        }

        StreamEvent::ToolResult {
            tool_call_id,
            is_error,
            ..
        } => {
            // The id is resolved regardless of state; a result proves the
            // call ran even when its tool_call_stop was lost or another
            // call's events interleaved.
            if !inner.pending_tools.remove(tool_call_id) {
                debug!(
                    state = ?inner.state,
                    tool_call_id, "tool_result with no matching tool_call_start; ignored"
                );
            } else if matches!(
                inner.state,
                AgentState::ToolExecuting
                    | AgentState::ToolPlanned
                    | AgentState::ToolCompleted
                    | AgentState::ToolFailed
                    | AgentState::Thinking
            ) {
                let to = if *is_error {
                    AgentState::ToolFailed
                } else {
                    AgentState::ToolCompleted
                };
                advance(inner, to);
            } else {
                debug!(
                    state = ?inner.state,
                    tool_call_id, "tool_result out of order; resolved without transition"
                );
            }
        }

        StreamEvent::MessageStop { .. } => {
            if inner.pending_tools.is_empty() {
                match inner.state {
                    AgentState::ConversationStart
                    | AgentState::Thinking
                    | AgentState::Responding
                    | AgentState::ToolCompleted
                    | AgentState::ToolFailed => advance(inner, AgentState::ConversationEnd),
                    state => debug!(?state, "message_stop ignored in this state"),
                }
            } else if inner.state != AgentState::Thinking {
                // Response paused awaiting tool results.
                advance(inner, AgentState::Thinking);
            }
        }

        StreamEvent::Error { .. } => {
            if inner.state.is_terminal() {
                debug!(state = ?inner.state, "stream error after terminal state; ignored");
            } else {
                inner.pending_tools.clear();
                advance(inner, AgentState::Error);
            }
        }
    }
    steps
}

#[async_trait]
impl Reactor for StateMachine {
    fn name(&self) -> &'static str {
        "state_machine"
    }

    fn attach(self: Arc<Self>, bus: &Arc<EventBus>) -> Vec<Subscription> {
        let me = Arc::clone(&self);
        let handler: Handler = Arc::new(move |event| {
            if let EventPayload::Stream(stream_event) = &event.payload {
                me.on_stream(stream_event);
            }
            Ok(())
        });
        EventKind::STREAM
            .iter()
            .map(|kind| bus.subscribe_handler(*kind, Arc::clone(&handler)))
            .collect()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = AgentState::Ready;
            from
        };
        let _ = self.bus.publish(Event::state(from, AgentState::Ready));
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        // A mid-conversation destroy closes the conversation first, so
        // `destroyed` is never entered straight from a responding state.
        let steps = {
            let mut inner = self.inner.lock();
            inner.pending_tools.clear();
            let mut steps = Vec::new();
            if !inner.state.is_terminal()
                && !matches!(inner.state, AgentState::Initializing | AgentState::Ready)
            {
                steps.push((inner.state, AgentState::ConversationEnd));
                inner.state = AgentState::ConversationEnd;
            }
            steps.push((inner.state, AgentState::Destroyed));
            inner.state = AgentState::Destroyed;
            steps
        };
        for (from, to) in steps {
            let _ = self.bus.publish(Event::state(from, to));
        }
        Ok(())
    }
}
