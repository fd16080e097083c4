//! Event types for the agent pipeline.
//!
//! Four event layers form the pipeline's processing order:
//!
//! - **[`StreamEvent`]**: raw deltas from the driver (message start/stop,
//!   text deltas, tool call construction, tool results, errors).
//! - **[`StateEvent`]**: derived lifecycle transitions of the agent.
//! - **[`MessageEvent`]**: one event per completed logical message.
//! - **[`ExchangeEvent`]**: one event per completed request/response round
//!   trip, carrying analytics.
//!
//! Layering is a consumption order, not a type hierarchy — every layer
//! travels over the same bus inside an [`Event`] envelope, and any
//! subscriber may consume any layer. [`EventKind`] is the closed vocabulary
//! of type tags used as the subscription key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ExchangeId;
use crate::messages::{Message, TokenUsage};

// ─────────────────────────────────────────────────────────────────────────────
// AgentState
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle/conversation state of the agent.
///
/// Conversation sequence: `Initializing → Ready → ConversationStart →
/// Thinking ⇄ Responding → ConversationEnd`, with the tool sub-sequence
/// `ToolPlanned → ToolExecuting → ToolCompleted | ToolFailed` nested inside
/// a conversation. `Error` is the per-turn terminal on a driver failure;
/// `Destroyed` is entered only at engine destroy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Reactor attached, not yet initialized.
    Initializing,
    /// Initialized, idle, accepting input.
    Ready,
    /// A model response has started.
    ConversationStart,
    /// Model working without visible output (or awaiting tool results).
    Thinking,
    /// Model emitting text.
    Responding,
    /// A tool call is being constructed.
    ToolPlanned,
    /// A tool call is fully constructed and executing.
    ToolExecuting,
    /// Tool execution succeeded.
    ToolCompleted,
    /// Tool execution failed.
    ToolFailed,
    /// The response terminated normally.
    ConversationEnd,
    /// The driver reported a stream failure.
    Error,
    /// Engine destroyed. Terminal.
    Destroyed,
}

impl AgentState {
    /// Whether this state ends a conversation turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConversationEnd | Self::Error | Self::Destroyed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamEvent — raw driver deltas
// ─────────────────────────────────────────────────────────────────────────────

/// Raw streaming events produced by the driver.
///
/// These are transient: reactors fold them into state, messages, and
/// exchange analytics. Content blocks are keyed by `index`; a block is
/// closed by its stop event or force-closed at `MessageStop`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A model response began.
    MessageStart {
        /// Driver-assigned message id.
        #[serde(rename = "messageId")]
        message_id: String,
        /// Model producing the response (used for cost attribution).
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Incremental text content for one block.
    TextDelta {
        /// Content-block index.
        index: u32,
        /// Text fragment.
        delta: String,
    },

    /// A tool-call block began.
    ToolCallStart {
        /// Content-block index.
        index: u32,
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
    },

    /// Incremental tool-input JSON for one block.
    ToolCallDelta {
        /// Content-block index.
        index: u32,
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Partial JSON fragment.
        #[serde(rename = "jsonDelta")]
        json_delta: String,
    },

    /// A tool-call block is fully constructed.
    ToolCallStop {
        /// Content-block index.
        index: u32,
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },

    /// Result of executing a tool call.
    ToolResult {
        /// Id of the call this result answers.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Result payload.
        content: Value,
        /// Whether the tool failed.
        #[serde(rename = "isError")]
        is_error: bool,
    },

    /// The model response completed.
    MessageStop {
        /// Driver-assigned message id.
        #[serde(rename = "messageId")]
        message_id: String,
        /// Stop reason (`end_turn`, `tool_use`, `max_tokens`, ...).
        #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
        /// Usage for this response.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },

    /// The driver reported a failure. Always an event, never an exception.
    Error {
        /// Error description.
        message: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived layers
// ─────────────────────────────────────────────────────────────────────────────

/// A state transition derived by the state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// The agent moved from `from` to `to`.
    Changed {
        /// State before the transition.
        from: AgentState,
        /// State after the transition.
        to: AgentState,
    },
}

/// One completed logical message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// The assembled message.
    pub message: Message,
}

/// Analytics for one completed request/response round trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeEvent {
    /// Correlation id assigned at send time.
    pub exchange_id: ExchangeId,
    /// Wall-clock duration, request to terminating signal, in ms.
    pub duration_ms: u64,
    /// Sum of all usage observed during the exchange.
    pub usage: TokenUsage,
    /// Cost in USD; `None` when the model has no pricing tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Model that served the exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Layer-tagged event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum EventPayload {
    /// Raw driver delta.
    Stream(StreamEvent),
    /// Derived state transition.
    State(StateEvent),
    /// Completed logical message.
    Message(MessageEvent),
    /// Completed exchange analytics.
    Exchange(ExchangeEvent),
}

/// Immutable event record as delivered by the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// UTC timestamp taken at publish time.
    pub timestamp: DateTime<Utc>,
    /// Layer-tagged payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload with the current timestamp.
    #[must_use]
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wrap a stream event.
    #[must_use]
    pub fn stream(event: StreamEvent) -> Self {
        Self::now(EventPayload::Stream(event))
    }

    /// Wrap a state transition.
    #[must_use]
    pub fn state(from: AgentState, to: AgentState) -> Self {
        Self::now(EventPayload::State(StateEvent::Changed { from, to }))
    }

    /// Wrap a completed message.
    #[must_use]
    pub fn message(message: Message) -> Self {
        Self::now(EventPayload::Message(MessageEvent { message }))
    }

    /// Wrap exchange analytics.
    #[must_use]
    pub fn exchange(exchange: ExchangeEvent) -> Self {
        Self::now(EventPayload::Exchange(exchange))
    }

    /// The type tag this event is dispatched on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Stream(e) => match e {
                StreamEvent::MessageStart { .. } => EventKind::MessageStart,
                StreamEvent::TextDelta { .. } => EventKind::TextDelta,
                StreamEvent::ToolCallStart { .. } => EventKind::ToolCallStart,
                StreamEvent::ToolCallDelta { .. } => EventKind::ToolCallDelta,
                StreamEvent::ToolCallStop { .. } => EventKind::ToolCallStop,
                StreamEvent::ToolResult { .. } => EventKind::ToolResult,
                StreamEvent::MessageStop { .. } => EventKind::MessageStop,
                StreamEvent::Error { .. } => EventKind::StreamError,
            },
            EventPayload::State(_) => EventKind::StateChanged,
            EventPayload::Message(_) => EventKind::Message,
            EventPayload::Exchange(_) => EventKind::ExchangeCompleted,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventKind — closed tag vocabulary, the bus subscription key
// ─────────────────────────────────────────────────────────────────────────────

/// Closed vocabulary of event type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `message_start`
    MessageStart,
    /// `text_delta`
    TextDelta,
    /// `tool_call_start`
    ToolCallStart,
    /// `tool_call_delta`
    ToolCallDelta,
    /// `tool_call_stop`
    ToolCallStop,
    /// `tool_result`
    ToolResult,
    /// `message_stop`
    MessageStop,
    /// `stream_error`
    StreamError,
    /// `state_changed`
    StateChanged,
    /// `message`
    Message,
    /// `exchange_completed`
    ExchangeCompleted,
}

impl EventKind {
    /// All Stream-layer kinds, in pipeline order.
    pub const STREAM: &'static [EventKind] = &[
        EventKind::MessageStart,
        EventKind::TextDelta,
        EventKind::ToolCallStart,
        EventKind::ToolCallDelta,
        EventKind::ToolCallStop,
        EventKind::ToolResult,
        EventKind::MessageStop,
        EventKind::StreamError,
    ];

    /// The wire tag string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageStart => "message_start",
            Self::TextDelta => "text_delta",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallDelta => "tool_call_delta",
            Self::ToolCallStop => "tool_call_stop",
            Self::ToolResult => "tool_result",
            Self::MessageStop => "message_stop",
            Self::StreamError => "stream_error",
            Self::StateChanged => "state_changed",
            Self::Message => "message",
            Self::ExchangeCompleted => "exchange_completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
