//! Incremental decoder for Chat Completions style SSE payloads.
//!
//! Text deltas are emitted as they arrive. Reasoning text, tool-call
//! fragments and usage counters are buffered and flushed once, in that
//! order, when the stream reaches a terminal condition.

use std::collections::BTreeMap;

use serde_json::Value;

use super::usage::UsageAccumulator;
use super::StreamControl;
use crate::error::GatewayError;
use crate::protocol::canonical::{NormalizedEvent, ToolUse};
use crate::protocol::openai_chat::response_decoder::validate_tool_arguments;

#[derive(Debug, Default, Clone)]
struct ToolSlot {
    id: String,
    name: String,
    arguments: String,
}

/// Stateful normalizer for one upstream stream.
#[derive(Debug)]
pub struct ChatCompletionsNormalizer {
    reasoning: String,
    slots: BTreeMap<u64, ToolSlot>,
    usage: UsageAccumulator,
    id_prefix: String,
    flushed: bool,
}

impl ChatCompletionsNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_prefix(format!("byok-tool-{}", crate::util::unix_now_ms()))
    }

    /// Use a fixed prefix for generated tool-call ids so repeated runs match.
    #[must_use]
    pub fn with_id_prefix(id_prefix: impl Into<String>) -> Self {
        Self {
            reasoning: String::new(),
            slots: BTreeMap::new(),
            usage: UsageAccumulator::new(),
            id_prefix: id_prefix.into(),
            flushed: false,
        }
    }

    /// Consume one SSE `data` payload.
    ///
    /// # Errors
    ///
    /// Fails only when a terminal condition flushes a tool call whose
    /// arguments are not valid JSON. Unparsable frames are skipped.
    pub fn push_data(
        &mut self,
        data: &str,
        out: &mut Vec<NormalizedEvent>,
    ) -> Result<StreamControl, GatewayError> {
        if self.flushed {
            return Ok(StreamControl::Done);
        }
        let data = data.trim();
        if data.is_empty() {
            return Ok(StreamControl::Continue);
        }
        if data == "[DONE]" {
            self.finish(out)?;
            return Ok(StreamControl::Done);
        }
        let Ok(frame) = serde_json::from_str::<Value>(data) else {
            tracing::trace!(frame = %crate::util::preview(data), "skipping unparsable stream frame");
            return Ok(StreamControl::Continue);
        };

        if let Some(usage) = frame.get("usage") {
            self.usage.merge_value(usage);
        }

        let Some(choice) = frame.pointer("/choices/0") else {
            return Ok(StreamControl::Continue);
        };
        if let Some(delta) = choice.get("delta") {
            self.apply_delta(delta, out);
        }

        let finish_reason = crate::util::str_field(choice, &["finish_reason", "finishReason"]);
        if finish_reason == Some("tool_calls") {
            self.finish(out)?;
            return Ok(StreamControl::Done);
        }
        Ok(StreamControl::Continue)
    }

    fn apply_delta(&mut self, delta: &Value, out: &mut Vec<NormalizedEvent>) {
        for key in ["reasoning_content", "reasoning"] {
            if let Some(text) = delta.get(key).and_then(Value::as_str) {
                self.reasoning.push_str(text);
                break;
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                self.apply_tool_fragment(call);
            }
        }

        let text = delta
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| delta.get("text").and_then(Value::as_str));
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            out.push(NormalizedEvent::Text {
                delta: text.to_string(),
            });
        }
    }

    fn apply_tool_fragment(&mut self, call: &Value) {
        let index = call
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(self.slots.len() as u64);
        let slot = self.slots.entry(index).or_default();
        if let Some(id) = call.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            slot.id = id.to_string();
        }
        let Some(function) = call.get("function") else {
            return;
        };
        if let Some(name) = function.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            slot.name = name.to_string();
        }
        match function.get("arguments") {
            Some(Value::String(fragment)) => slot.arguments.push_str(fragment),
            Some(args @ Value::Object(_)) => slot.arguments = args.to_string(),
            _ => {}
        }
    }

    /// Flush buffered reasoning, tool calls and usage. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] naming the first tool whose
    /// accumulated arguments are not valid JSON.
    pub fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;

        let summary = self.reasoning.trim();
        if !summary.is_empty() {
            out.push(NormalizedEvent::Thinking {
                summary: summary.to_string(),
            });
        }

        for (index, slot) in std::mem::take(&mut self.slots) {
            let name = slot.name.trim();
            if name.is_empty() {
                continue;
            }
            let input_json = if slot.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                slot.arguments
            };
            validate_tool_arguments(name, &input_json)?;
            let id = if slot.id.trim().is_empty() {
                format!("{}-{index}", self.id_prefix)
            } else {
                slot.id.trim().to_string()
            };
            out.push(NormalizedEvent::ToolUse(ToolUse {
                id,
                name: name.to_string(),
                input_json,
            }));
        }

        if let Some(usage) = self.usage.snapshot() {
            out.push(NormalizedEvent::TokenUsage(usage));
        }
        Ok(())
    }
}

impl Default for ChatCompletionsNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a complete list of `data` payloads, flushing at the end.
///
/// # Errors
///
/// Propagates [`ChatCompletionsNormalizer::push_data`] failures.
pub fn normalize_frames<'a>(
    frames: impl IntoIterator<Item = &'a str>,
    id_prefix: &str,
) -> Result<Vec<NormalizedEvent>, GatewayError> {
    let mut normalizer = ChatCompletionsNormalizer::with_id_prefix(id_prefix);
    let mut out = Vec::new();
    for frame in frames {
        if normalizer.push_data(frame, &mut out)? == StreamControl::Done {
            return Ok(out);
        }
    }
    normalizer.finish(&mut out)?;
    Ok(out)
}
