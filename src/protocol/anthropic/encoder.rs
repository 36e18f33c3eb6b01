use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationParams, ToolDefinition};
use crate::protocol::merge_overlay;

use super::{AnthropicMessage, AnthropicRequest, AnthropicThinking, AnthropicTool, DEFAULT_MAX_TOKENS};

/// Encode a Messages API body, applying the provider overlay last.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the typed body fails to serialize.
pub fn encode_messages_request(
    model: &str,
    system: Option<&str>,
    messages: Vec<AnthropicMessage>,
    tools: &[ToolDefinition],
    params: &GenerationParams,
    stream: bool,
    overlay: &serde_json::Map<String, Value>,
) -> Result<Value, GatewayError> {
    let mut max_tokens = params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let thinking = params.thinking_budget.map(|budget_tokens| {
        // Upstream rejects max_tokens <= budget_tokens.
        if max_tokens <= budget_tokens {
            max_tokens = budget_tokens + DEFAULT_MAX_TOKENS;
        }
        AnthropicThinking {
            type_: "enabled",
            budget_tokens,
        }
    });

    let request = AnthropicRequest {
        model: model.to_string(),
        max_tokens,
        system: system
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        messages,
        tools: (!tools.is_empty()).then(|| encode_tools(tools)),
        stream,
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k,
        stop_sequences: (!params.stop.is_empty()).then(|| params.stop.clone()),
        thinking,
    };
    let mut body = serde_json::to_value(&request)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode messages request: {err}")))?;
    merge_overlay(&mut body, overlay);
    Ok(body)
}

#[must_use]
pub fn encode_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        })
        .collect()
}
