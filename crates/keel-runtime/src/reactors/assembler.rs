//! Message assembler — folds stream deltas into complete messages.
//!
//! Pending content is keyed by content-block index and owned exclusively
//! by this reactor. Text deltas concatenate in arrival order; tool-input
//! JSON fragments concatenate and parse once, when the block closes. Every
//! logical message is emitted exactly once: replays of an already-emitted
//! message id are suppressed, not re-emitted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::events::{Event, EventKind, EventPayload, StreamEvent};
use keel_core::ids::MessageId;
use keel_core::messages::{ContentBlock, Message, TokenUsage, ToolCall};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::{EventBus, Handler, Subscription};
use crate::reactor::Reactor;

enum PendingBlock {
    Text(String),
    ToolCall {
        tool_call_id: String,
        name: String,
        json: String,
        /// Set once the block's stop event parsed the input.
        finished: Option<ToolCall>,
    },
}

struct PendingMessage {
    message_id: String,
    blocks: BTreeMap<u32, PendingBlock>,
}

#[derive(Default)]
struct AsmInner {
    current: Option<PendingMessage>,
    /// Dedup keys of everything already emitted, namespaced by subtype.
    emitted: HashSet<String>,
    /// Message id of a replay being swallowed until its stop event.
    suppressing: Option<String>,
}

/// Reactor assembling complete messages from stream deltas.
pub struct MessageAssembler {
    bus: Arc<EventBus>,
    inner: Mutex<AsmInner>,
}

impl MessageAssembler {
    /// Create an assembler with no pending content.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: Mutex::new(AsmInner::default()),
        }
    }

    /// Number of open content blocks (for inspection in tests).
    #[must_use]
    pub fn open_block_count(&self) -> usize {
        self.inner
            .lock()
            .current
            .as_ref()
            .map_or(0, |m| m.blocks.len())
    }

    fn on_stream(&self, event: &StreamEvent) {
        // Collect messages under the lock, publish after releasing it.
        let out = {
            let mut inner = self.inner.lock();
            fold(&mut inner, event)
        };
        for message in out {
            let _ = self.bus.publish(Event::message(message));
        }
    }
}

/// Fold one stream event into pending state, returning the messages it
/// completed.
fn fold(inner: &mut AsmInner, event: &StreamEvent) -> Vec<Message> {
    let mut out = Vec::new();
    match event {
        StreamEvent::MessageStart { message_id, .. } => {
            if inner.emitted.contains(&dedup_key("msg", message_id)) {
                warn!(message_id, "replayed message id; suppressing re-emission");
                inner.suppressing = Some(message_id.clone());
                inner.current = None;
            } else {
                if let Some(open) = inner.current.take() {
                    debug!(
                        message_id = open.message_id,
                        "message_start while a message was open; dropping partial"
                    );
                }
                inner.suppressing = None;
                inner.current = Some(PendingMessage {
                    message_id: message_id.clone(),
                    blocks: BTreeMap::new(),
                });
            }
        }

        StreamEvent::TextDelta { index, delta } => {
            let Some(current) = inner.current.as_mut() else {
                if inner.suppressing.is_none() {
                    debug!(index, "text_delta with no open message; ignored");
                }
                return out;
            };
            match current
                .blocks
                .entry(*index)
                .or_insert_with(|| PendingBlock::Text(String::new()))
            {
                PendingBlock::Text(text) => text.push_str(delta),
                PendingBlock::ToolCall { .. } => {
                    debug!(index, "text_delta for a tool-call block; ignored");
                }
            }
        }

        StreamEvent::ToolCallStart {
            index,
            tool_call_id,
            name,
        } => {
            if inner.suppressing.is_some() {
                return out;
            }
            // A tool block may begin before any message_start arrives;
            // accumulate it under a locally minted message id.
            let current = inner.current.get_or_insert_with(|| {
                debug!(tool_call_id, "tool_call_start before message_start");
                PendingMessage {
                    message_id: MessageId::new().to_string(),
                    blocks: BTreeMap::new(),
                }
            });
            let _ = current.blocks.insert(
                *index,
                PendingBlock::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    name: name.clone(),
                    json: String::new(),
                    finished: None,
                },
            );
        }

        StreamEvent::ToolCallDelta {
            index, json_delta, ..
        } => {
            let Some(current) = inner.current.as_mut() else {
                return out;
            };
            match current.blocks.get_mut(index) {
                Some(PendingBlock::ToolCall { json, .. }) => json.push_str(json_delta),
                _ => debug!(index, "tool_call_delta with no matching block; ignored"),
            }
        }

        StreamEvent::ToolCallStop { index, .. } => {
            let Some(current) = inner.current.as_mut() else {
                return out;
            };
            match current.blocks.get_mut(index) {
                Some(block @ PendingBlock::ToolCall { .. }) => {
                    finalize_tool_block(block, &mut inner.emitted, &mut out);
                }
                _ => debug!(index, "tool_call_stop with no matching block; ignored"),
            }
        }

        StreamEvent::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            if inner.emitted.insert(dedup_key("result", tool_call_id)) {
                out.push(Message::ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                });
            } else {
                warn!(tool_call_id, "duplicate tool result; suppressed");
            }
        }

        StreamEvent::MessageStop {
            message_id,
            stop_reason,
            usage,
        } => {
            if inner.suppressing.as_deref() == Some(message_id.as_str()) {
                inner.suppressing = None;
                return out;
            }
            let Some(mut current) = inner.current.take() else {
                debug!(message_id, "message_stop with no open message; ignored");
                return out;
            };
            if current.message_id != *message_id {
                debug!(
                    open = current.message_id,
                    stopped = message_id,
                    "message_stop id mismatch; closing the open message"
                );
            }

            // Force-close blocks that never saw their stop event.
            let mut blocks = Vec::new();
            for (_, mut block) in std::mem::take(&mut current.blocks) {
                if let PendingBlock::ToolCall { finished: None, .. } = &block {
                    finalize_tool_block(&mut block, &mut inner.emitted, &mut out);
                }
                match block {
                    PendingBlock::Text(text) => blocks.push(ContentBlock::Text { text }),
                    PendingBlock::ToolCall {
                        finished: Some(call),
                        ..
                    } => blocks.push(ContentBlock::ToolCall { call }),
                    // Parse failed; already reported as an error message.
                    PendingBlock::ToolCall { finished: None, .. } => {}
                }
            }

            if inner.emitted.insert(dedup_key("msg", &current.message_id)) {
                out.push(Message::Assistant {
                    id: MessageId::from_driver(&current.message_id),
                    blocks,
                    stop_reason: stop_reason.clone(),
                    usage: usage.clone(),
                });
            } else {
                warn!(
                    message_id = current.message_id,
                    "assistant message already emitted; suppressed"
                );
            }
        }

        StreamEvent::Error { message } => {
            if let Some(dropped) = inner.current.take() {
                debug!(
                    message_id = dropped.message_id,
                    open_blocks = dropped.blocks.len(),
                    "stream error; discarding partial message"
                );
            }
            inner.suppressing = None;
            out.push(Message::Error {
                id: MessageId::new(),
                error: message.clone(),
            });
        }
    }
    out
}

fn dedup_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Close a tool-call block: parse the accumulated JSON and either record
/// the finished call (also emitting its tool-call message, once) or emit
/// an error message on a parse failure.
fn finalize_tool_block(
    block: &mut PendingBlock,
    emitted: &mut HashSet<String>,
    out: &mut Vec<Message>,
) {
    let PendingBlock::ToolCall {
        tool_call_id,
        name,
        json,
        finished,
    } = block
    else {
        return;
    };
    if finished.is_some() {
        debug!(tool_call_id, "tool block already closed; ignored");
        return;
    }
    match parse_tool_input(json) {
        Ok(arguments) => {
            let call = ToolCall {
                id: tool_call_id.clone(),
                name: name.clone(),
                arguments,
            };
            *finished = Some(call.clone());
            if emitted.insert(dedup_key("call", tool_call_id)) {
                out.push(Message::ToolCall { call });
            } else {
                warn!(tool_call_id, "duplicate tool call; suppressed");
            }
        }
        Err(error) => {
            warn!(tool_call_id, %error, "tool input is not valid JSON");
            out.push(Message::Error {
                id: MessageId::new(),
                error: format!("tool input for `{name}` is not valid JSON: {error}"),
            });
        }
    }
}

fn parse_tool_input(json: &str) -> Result<serde_json::Map<String, Value>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    let value: Value = serde_json::from_str(json)?;
    match value {
        Value::Object(map) => Ok(map),
        other => Ok(serde_json::Map::from_iter([("input".to_string(), other)])),
    }
}

/// Usage attached to an assistant message, if any (helper for tests and
/// downstream consumers).
#[must_use]
pub fn assistant_usage(message: &Message) -> Option<&TokenUsage> {
    match message {
        Message::Assistant { usage, .. } => usage.as_ref(),
        _ => None,
    }
}

#[async_trait]
impl Reactor for MessageAssembler {
    fn name(&self) -> &'static str {
        "message_assembler"
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

    async fn destroy(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(dropped) = inner.current.take() {
            debug!(
                message_id = dropped.message_id,
                open_blocks = dropped.blocks.len(),
                "destroy; discarding pending content"
            );
        }
        inner.emitted.clear();
        inner.suppressing = None;
        Ok(())
    }
}
