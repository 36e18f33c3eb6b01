use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationParams, ToolDefinition};
use crate::protocol::merge_overlay;

use super::{OpenAiChatRequest, OpenAiFunction, OpenAiMessage, OpenAiStreamOptions, OpenAiTool};

/// Encode a Chat Completions body, applying the provider overlay last.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the typed body fails to serialize.
pub fn encode_chat_request(
    model: &str,
    messages: Vec<OpenAiMessage>,
    tools: &[ToolDefinition],
    params: &GenerationParams,
    stream: bool,
    overlay: &serde_json::Map<String, Value>,
) -> Result<Value, GatewayError> {
    let has_tools = !tools.is_empty();
    let request = OpenAiChatRequest {
        model: model.to_string(),
        messages,
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
        tools: has_tools.then(|| encode_tools(tools)),
        tool_choice: has_tools.then(|| "auto".to_string()),
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        top_p: params.top_p,
        presence_penalty: params.presence_penalty,
        frequency_penalty: params.frequency_penalty,
        stop: (!params.stop.is_empty()).then(|| params.stop.clone()),
        seed: params.seed,
    };
    let mut body = serde_json::to_value(&request)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode chat request: {err}")))?;
    merge_overlay(&mut body, overlay);
    Ok(body)
}

#[must_use]
pub fn encode_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|tool| OpenAiTool {
            type_: "function".to_string(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}
