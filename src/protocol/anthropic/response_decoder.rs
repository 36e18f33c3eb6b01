use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{ToolCompletion, ToolUse};

use super::{AnthropicContentBlock, AnthropicResponse};

fn parse_response(response: &Value) -> Result<AnthropicResponse, GatewayError> {
    serde_json::from_value(response.clone()).map_err(|err| {
        GatewayError::protocol_with_preview(
            format_args!("Anthropic response has an unexpected shape ({err})"),
            &response.to_string(),
        )
    })
}

fn concat_text(blocks: &[AnthropicContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Tool uses in block order; blocks without an id or name are skipped.
#[must_use]
pub fn tool_uses(blocks: &[AnthropicContentBlock]) -> Vec<ToolUse> {
    blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::ToolUse { id, name, input }
                if !id.trim().is_empty() && !name.trim().is_empty() =>
            {
                let input_json = if input.is_null() {
                    "{}".to_string()
                } else {
                    input.to_string()
                };
                Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input_json,
                })
            }
            _ => None,
        })
        .collect()
}

/// Concatenated text blocks of a non-streaming response.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when the response carries no text.
pub fn decode_text(response: &Value) -> Result<String, GatewayError> {
    let parsed = parse_response(response)?;
    let text = concat_text(&parsed.content);
    if text.is_empty() {
        return Err(GatewayError::protocol_with_preview(
            "Anthropic response has no text content",
            &response.to_string(),
        ));
    }
    Ok(text)
}

/// # Errors
///
/// Returns [`GatewayError::Protocol`] when the response has neither text
/// nor tool uses.
pub fn decode_tool_completion(response: &Value) -> Result<ToolCompletion, GatewayError> {
    let parsed = parse_response(response)?;
    let text = concat_text(&parsed.content);
    let tool_uses = tool_uses(&parsed.content);
    if !tool_uses.is_empty() {
        return Ok(ToolCompletion::ToolCalls {
            tool_uses,
            assistant_text: text,
        });
    }
    if text.is_empty() {
        return Err(GatewayError::protocol_with_preview(
            "Anthropic response has neither text nor tool_use content",
            &response.to_string(),
        ));
    }
    Ok(ToolCompletion::Final { text })
}
