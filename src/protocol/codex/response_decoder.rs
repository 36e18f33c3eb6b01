use serde_json::Value;

use crate::error::GatewayError;

/// Concatenate every text field of a Responses API result.
///
/// Reads `output_text`, then each `output[].text`, then each
/// `output[].content[]` part typed `output_text` or `text`.
#[must_use]
pub fn extract_responses_text(response: &Value) -> String {
    let mut out = String::new();
    let mut push = |value: Option<&Value>| {
        if let Some(text) = value.and_then(Value::as_str) {
            out.push_str(text);
        }
    };
    push(response.get("output_text"));
    for item in response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        push(item.get("text"));
        for part in item
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if matches!(
                part.get("type").and_then(Value::as_str),
                Some("output_text" | "text")
            ) {
                push(part.get("text"));
            }
        }
    }
    out
}

/// # Errors
///
/// Returns [`GatewayError::Protocol`] when no text could be extracted.
pub fn decode_text(response: &Value) -> Result<String, GatewayError> {
    let text = extract_responses_text(response);
    if text.is_empty() {
        return Err(GatewayError::protocol_with_preview(
            "Codex response is missing output_text/output[].content[].text",
            &response.to_string(),
        ));
    }
    Ok(text)
}
