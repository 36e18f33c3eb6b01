use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::NormalizedEvent;
use crate::stream::{SseEvent, StreamControl, UsageAccumulator};

/// Decoder for typed Responses API stream events.
///
/// Output text passes through immediately. Reasoning deltas and usage are
/// buffered until the stream ends.
#[derive(Debug, Default)]
pub struct CodexStreamDecoder {
    reasoning: String,
    streamed_text: String,
    usage: UsageAccumulator,
    finished: bool,
}

fn event_type<'a>(event: &'a SseEvent, json: &'a Value) -> Option<&'a str> {
    event
        .event
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| crate::util::str_field(json, &["type", "event"]))
}

fn text_delta(json: &Value) -> Option<&str> {
    let direct = json
        .get("delta")
        .and_then(Value::as_str)
        .or_else(|| json.get("text").and_then(Value::as_str))
        .filter(|s| !s.is_empty());
    direct.or_else(|| {
        let delta = json.pointer("/choices/0/delta")?;
        delta
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| delta.get("text").and_then(Value::as_str))
    })
}

impl CodexStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one SSE event.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] for a `response.error` event.
    pub fn push_event(
        &mut self,
        event: &SseEvent,
        out: &mut Vec<NormalizedEvent>,
    ) -> Result<StreamControl, GatewayError> {
        if self.finished {
            return Ok(StreamControl::Done);
        }
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(StreamControl::Continue);
        }
        if data == "[DONE]" {
            self.finish(out);
            return Ok(StreamControl::Done);
        }
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            tracing::trace!(frame = %crate::util::preview(data), "skipping unparsable stream frame");
            return Ok(StreamControl::Continue);
        };

        if let Some(usage) = json.pointer("/response/usage").or_else(|| json.get("usage")) {
            self.usage.merge_value(usage);
        }

        match event_type(event, &json) {
            Some("response.reasoning_summary.delta" | "response.reasoning.delta") => {
                if let Some(delta) = text_delta(&json) {
                    self.reasoning.push_str(delta);
                }
            }
            Some("response.output_text.delta") => {
                if let Some(delta) = text_delta(&json) {
                    self.push_text(delta, out);
                }
            }
            // Carries the full text; only what the deltas missed is emitted.
            Some("response.output_text" | "response.output_text.done") => {
                if let Some(full) = text_delta(&json) {
                    if let Some(rest) = full.strip_prefix(self.streamed_text.as_str()) {
                        let rest = rest.to_string();
                        self.push_text(&rest, out);
                    }
                }
            }
            Some("response.completed") => {
                self.finish(out);
                return Ok(StreamControl::Done);
            }
            Some("response.error") => {
                let message = json
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .or_else(|| json.get("message").and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .unwrap_or("unknown");
                return Err(GatewayError::Upstream {
                    status: 200,
                    message: format!("Codex stream error: {message}"),
                });
            }
            // output_item.* and everything else carries nothing to emit.
            _ => {}
        }
        Ok(StreamControl::Continue)
    }

    fn push_text(&mut self, delta: &str, out: &mut Vec<NormalizedEvent>) {
        if delta.is_empty() {
            return;
        }
        self.streamed_text.push_str(delta);
        out.push(NormalizedEvent::Text {
            delta: delta.to_string(),
        });
    }

    /// Emit buffered reasoning, then usage. Later calls are no-ops.
    pub fn finish(&mut self, out: &mut Vec<NormalizedEvent>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let summary = self.reasoning.trim();
        if !summary.is_empty() {
            out.push(NormalizedEvent::Thinking {
                summary: summary.to_string(),
            });
        }
        if let Some(usage) = self.usage.snapshot() {
            out.push(NormalizedEvent::TokenUsage(usage));
        }
    }
}
