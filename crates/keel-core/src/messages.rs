//! Message and content types.
//!
//! A [`Message`] is one completed logical unit of conversation — assembled
//! from stream deltas by the runtime, or published directly for user input
//! and errors. [`TokenUsage`] is the usage accounting attached to assistant
//! messages and summed per exchange.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ExchangeId, MessageId};

/// Token usage for one model response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Input (prompt) tokens.
    pub input_tokens: u64,
    /// Output (completion) tokens.
    pub output_tokens: u64,
    /// Tokens served from prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    /// Tokens written to prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
}

impl TokenUsage {
    /// Accumulate another usage record into this one.
    ///
    /// Optional cache counters stay `None` unless at least one side has a
    /// value, so unset fields keep skipping serialization.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens = add_opt(self.cache_read_tokens, other.cache_read_tokens);
        self.cache_creation_tokens =
            add_opt(self.cache_creation_tokens, other.cache_creation_tokens);
    }

    /// Total tokens, cache counters included.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_read_tokens.unwrap_or(0)
            + self.cache_creation_tokens.unwrap_or(0)
    }
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

/// A fully constructed tool call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool call id (driver-assigned).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed input arguments.
    pub arguments: Map<String, Value>,
}

/// One content block of an assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Block text, deltas concatenated in arrival order.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolCall {
        /// The completed call.
        call: ToolCall,
    },
}

/// One completed logical message.
///
/// iOS-style subtype tags: `user`, `assistant`, `tool_call`, `tool_result`,
/// `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// User input, published at send time.
    User {
        /// Message id.
        id: MessageId,
        /// Exchange this request opened.
        #[serde(rename = "exchangeId")]
        exchange_id: ExchangeId,
        /// Raw input text.
        text: String,
    },
    /// Assistant response, aggregating all blocks of one stream message.
    Assistant {
        /// Driver-assigned message id.
        id: MessageId,
        /// Content blocks in index order.
        blocks: Vec<ContentBlock>,
        /// Stop reason reported by the driver.
        #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
        /// Usage for this response.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    /// A single completed tool call (emitted as soon as its block closes).
    ToolCall {
        /// The completed call.
        call: ToolCall,
    },
    /// Result of a tool execution.
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
    /// Terminal error surfaced as a message.
    Error {
        /// Message id (locally minted).
        id: MessageId,
        /// Error description.
        error: String,
    },
}

impl Message {
    /// The id this message deduplicates on.
    #[must_use]
    pub fn dedup_key(&self) -> &str {
        match self {
            Self::User { id, .. } | Self::Assistant { id, .. } | Self::Error { id, .. } => {
                id.as_str()
            }
            Self::ToolCall { call } => &call.id,
            Self::ToolResult { tool_call_id, .. } => tool_call_id,
        }
    }
}
