use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{ToolCompletion, ToolUse};

/// `choices[0].message.content` of a non-streaming response.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when the content field is absent.
pub fn decode_text(label: &str, response: &Value) -> Result<String, GatewayError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GatewayError::protocol_with_preview(
                format_args!("{label} response is missing choices[0].message.content"),
                &response.to_string(),
            )
        })
}

/// Decode a non-streaming response made with tools.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when neither text nor tool calls are
/// present, or when a tool call carries non-JSON arguments.
pub fn decode_tool_completion(label: &str, response: &Value) -> Result<ToolCompletion, GatewayError> {
    let message = response.pointer("/choices/0/message");
    let content = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str);

    let tool_uses = message
        .and_then(|m| m.get("tool_calls"))
        .map(decode_tool_calls)
        .transpose()?
        .unwrap_or_default();
    if !tool_uses.is_empty() {
        return Ok(ToolCompletion::ToolCalls {
            tool_uses,
            assistant_text: content.unwrap_or_default().to_string(),
        });
    }

    content
        .map(|text| ToolCompletion::Final {
            text: text.to_string(),
        })
        .ok_or_else(|| {
            GatewayError::protocol_with_preview(
                format_args!("{label} response is missing choices[0].message.content/tool_calls"),
                &response.to_string(),
            )
        })
}

/// Decode an assistant `tool_calls` array into tool uses.
///
/// Entries without a string id or function name are skipped. Arguments may
/// arrive as a JSON string or as an already-parsed object.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] naming the tool whose arguments are not JSON.
pub fn decode_tool_calls(tool_calls: &Value) -> Result<Vec<ToolUse>, GatewayError> {
    let Some(items) = tool_calls.as_array() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(items.len());
    for call in items {
        let Some(id) = call.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(name) = call.pointer("/function/name").and_then(Value::as_str) else {
            continue;
        };
        let input_json = match call.pointer("/function/arguments") {
            Some(Value::String(args)) if !args.trim().is_empty() => args.clone(),
            Some(args @ Value::Object(_)) => args.to_string(),
            _ => "{}".to_string(),
        };
        validate_tool_arguments(name, &input_json)?;
        out.push(ToolUse {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            input_json,
        });
    }
    Ok(out)
}

/// Tool arguments must parse as JSON.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] naming the tool and quoting the arguments.
pub fn validate_tool_arguments(tool_name: &str, input_json: &str) -> Result<(), GatewayError> {
    serde_json::from_str::<serde::de::IgnoredAny>(input_json)
        .map(|_| ())
        .map_err(|_| {
            GatewayError::protocol_with_preview(
                format_args!("Tool({tool_name}) arguments are not valid JSON"),
                input_json,
            )
        })
}
