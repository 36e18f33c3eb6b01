use std::collections::BTreeMap;

use crate::error::GatewayError;
use crate::protocol::canonical::{NormalizedEvent, ToolUse};
use crate::protocol::openai_chat::response_decoder::validate_tool_arguments;
use crate::stream::{StreamControl, UsageAccumulator};

use super::{AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent};

#[derive(Debug)]
enum BlockState {
    Text,
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        initial_input: Option<String>,
        partial_json: String,
    },
}

/// Stateful Messages API stream decoder.
///
/// Text deltas pass straight through. Thinking and tool input deltas are
/// buffered per content block and emitted when the block stops. Usage is
/// reported once, after everything else.
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    blocks: BTreeMap<usize, BlockState>,
    usage: UsageAccumulator,
    finished: bool,
}

impl AnthropicStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one SSE `data` payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] for an `error` event and
    /// [`GatewayError::Protocol`] when a tool block closes with invalid JSON.
    pub fn push_data(
        &mut self,
        data: &str,
        out: &mut Vec<NormalizedEvent>,
    ) -> Result<StreamControl, GatewayError> {
        if self.finished {
            return Ok(StreamControl::Done);
        }
        let data = data.trim();
        if data.is_empty() {
            return Ok(StreamControl::Continue);
        }
        let event = match serde_json::from_str::<AnthropicStreamEvent>(data) {
            Ok(event) => event,
            Err(err) => {
                tracing::trace!(error = %err, frame = %crate::util::preview(data), "skipping unparsable stream frame");
                return Ok(StreamControl::Continue);
            }
        };

        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.merge(usage.into());
                }
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let state = match content_block {
                    AnthropicContentBlock::Text { text } => {
                        push_text(out, text);
                        BlockState::Text
                    }
                    AnthropicContentBlock::Thinking { thinking } => BlockState::Thinking(thinking),
                    AnthropicContentBlock::ToolUse { id, name, input } => BlockState::ToolUse {
                        id,
                        name,
                        initial_input: input
                            .as_object()
                            .filter(|map| !map.is_empty())
                            .map(|_| input.to_string()),
                        partial_json: String::new(),
                    },
                    _ => return Ok(StreamControl::Continue),
                };
                self.blocks.insert(index, state);
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } => push_text(out, text),
                AnthropicDelta::ThinkingDelta { thinking } => {
                    if let Some(BlockState::Thinking(buffer)) = self.blocks.get_mut(&index) {
                        buffer.push_str(&thinking);
                    } else {
                        self.blocks.insert(index, BlockState::Thinking(thinking));
                    }
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(BlockState::ToolUse {
                        partial_json: buffer,
                        ..
                    }) = self.blocks.get_mut(&index)
                    {
                        buffer.push_str(&partial_json);
                    }
                }
                AnthropicDelta::Other => {}
            },
            AnthropicStreamEvent::ContentBlockStop { index } => {
                if let Some(state) = self.blocks.remove(&index) {
                    close_block(state, out)?;
                }
            }
            AnthropicStreamEvent::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    self.usage.merge(usage.into());
                }
            }
            AnthropicStreamEvent::MessageStop => {
                self.finish(out)?;
                return Ok(StreamControl::Done);
            }
            AnthropicStreamEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    error.type_
                } else {
                    error.message
                };
                return Err(GatewayError::Upstream {
                    status: 200,
                    message: format!("Anthropic stream error: {message}"),
                });
            }
            AnthropicStreamEvent::Ignored => {}
        }
        Ok(StreamControl::Continue)
    }

    /// Close any open blocks and report usage. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] when an open tool block holds
    /// invalid JSON.
    pub fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        for (_, state) in std::mem::take(&mut self.blocks) {
            close_block(state, out)?;
        }
        if let Some(usage) = self.usage.snapshot() {
            out.push(NormalizedEvent::TokenUsage(usage));
        }
        Ok(())
    }
}

fn push_text(out: &mut Vec<NormalizedEvent>, text: String) {
    if !text.is_empty() {
        out.push(NormalizedEvent::Text { delta: text });
    }
}

fn close_block(state: BlockState, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
    match state {
        BlockState::Text => {}
        BlockState::Thinking(buffer) => {
            let summary = buffer.trim();
            if !summary.is_empty() {
                out.push(NormalizedEvent::Thinking {
                    summary: summary.to_string(),
                });
            }
        }
        BlockState::ToolUse {
            id,
            name,
            initial_input,
            partial_json,
        } => {
            if name.trim().is_empty() {
                return Ok(());
            }
            let input_json = if partial_json.trim().is_empty() {
                initial_input.unwrap_or_else(|| "{}".to_string())
            } else {
                partial_json
            };
            validate_tool_arguments(&name, &input_json)?;
            out.push(NormalizedEvent::ToolUse(ToolUse {
                id,
                name,
                input_json,
            }));
        }
    }
    Ok(())
}
