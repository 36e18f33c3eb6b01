pub mod response_decoder;
pub mod stream;

use serde::Serialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::merge_overlay;

/// Codex Responses API request wire type.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub stream: bool,
}

/// Encode a `/responses` body, applying the provider overlay last.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] if the typed body fails to serialize.
pub fn encode_responses_request(
    model: &str,
    instructions: Option<&str>,
    input: &str,
    stream: bool,
    overlay: &serde_json::Map<String, Value>,
) -> Result<Value, GatewayError> {
    let request = ResponsesRequest {
        model: model.to_string(),
        input: input.to_string(),
        instructions: instructions
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        stream,
    };
    let mut body = serde_json::to_value(&request)
        .map_err(|err| GatewayError::Internal(format!("Failed to encode responses request: {err}")))?;
    merge_overlay(&mut body, overlay);
    Ok(body)
}
