//! One streamed chat turn that may end in tool calls.
//!
//! The gateway never runs tools: each `ToolUse` becomes a start node and a
//! use node, and the turn ends with a finished node whose stop reason tells
//! the host whether it has tool results to send back.

use futures_util::StreamExt;
use serde_json::Value;

use super::envelope::{chat_envelope, ChunkStream};
use crate::protocol::canonical::NormalizedEvent;
use crate::protocol::nodes::{OutputNode, STOP_REASON_END_TURN, STOP_REASON_TOOL_USE_REQUESTED};
use crate::stream::EventStream;
use crate::transport::CallContext;

/// Maps normalized events to output nodes with increasing ids.
#[derive(Debug)]
pub struct ToolTurnEmitter {
    next_id: u32,
    full_text: String,
    tool_calls: usize,
}

impl Default for ToolTurnEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolTurnEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            full_text: String::new(),
            tool_calls: 0,
        }
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Envelopes for one event, in emission order.
    pub fn on_event(&mut self, event: NormalizedEvent) -> Vec<Value> {
        match event {
            NormalizedEvent::Text { delta } => {
                if delta.is_empty() {
                    return Vec::new();
                }
                self.full_text.push_str(&delta);
                let node = OutputNode::raw_response(self.take_id(), &delta);
                vec![chat_envelope(&delta, vec![node], None)]
            }
            NormalizedEvent::Thinking { summary } => {
                let node = OutputNode::thinking(self.take_id(), &summary);
                vec![chat_envelope("", vec![node], None)]
            }
            NormalizedEvent::TokenUsage(usage) => {
                let node = OutputNode::token_usage(self.take_id(), usage);
                vec![chat_envelope("", vec![node], None)]
            }
            NormalizedEvent::ToolUse(tool) => {
                self.tool_calls += 1;
                let start = OutputNode::tool_use_start(self.take_id(), &tool);
                let used = OutputNode::tool_use(self.take_id(), &tool);
                vec![
                    chat_envelope("", vec![start], None),
                    chat_envelope("", vec![used], None),
                ]
            }
        }
    }

    #[must_use]
    pub fn stop_reason(&self) -> i64 {
        if self.tool_calls > 0 {
            STOP_REASON_TOOL_USE_REQUESTED
        } else {
            STOP_REASON_END_TURN
        }
    }

    /// The closing envelope carrying the full text and the stop reason.
    pub fn finish(&mut self) -> Value {
        let node = OutputNode::main_text_finished(self.take_id(), &self.full_text);
        chat_envelope("", vec![node], Some(self.stop_reason()))
    }
}

/// Drive an adapter event stream through a [`ToolTurnEmitter`].
pub fn tool_turn_stream(ctx: CallContext, events: EventStream) -> ChunkStream<Value> {
    Box::pin(async_stream::try_stream! {
        let mut events = events;
        let mut emitter = ToolTurnEmitter::new();
        while let Some(event) = events.next().await {
            let event = event?;
            for envelope in emitter.on_event(event) {
                ctx.check()?;
                yield envelope;
            }
        }
        ctx.check()?;
        tracing::debug!(stop_reason = emitter.stop_reason(), "chat tool turn finished");
        yield emitter.finish();
    })
}
