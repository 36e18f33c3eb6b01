pub mod anthropic;
pub mod canonical;
pub mod codex;
pub mod nodes;
pub mod openai_chat;

use serde_json::{Map, Value};

/// Merge a provider's extra-body overlay into an encoded request body.
///
/// Overlay keys replace body keys wholesale; nested objects are not merged.
pub(crate) fn merge_overlay(body: &mut Value, overlay: &Map<String, Value>) {
    let Value::Object(target) = body else {
        return;
    };
    for (key, value) in overlay {
        target.insert(key.clone(), value.clone());
    }
}

/// Parse an upstream response body as JSON, quoting it on failure.
///
/// # Errors
///
/// Returns [`crate::error::GatewayError::Protocol`] with a bounded preview.
pub(crate) fn parse_json_body(label: &str, text: &str) -> Result<Value, crate::error::GatewayError> {
    serde_json::from_str(text).map_err(|_| {
        crate::error::GatewayError::protocol_with_preview(
            format_args!("{label} response is not valid JSON"),
            text,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overlay_replaces_keys() {
        let mut body = json!({"model": "a", "temperature": 0.7, "nested": {"x": 1}});
        let overlay = json!({"temperature": 0.0, "nested": {"y": 2}, "extra": true});
        merge_overlay(&mut body, overlay.as_object().unwrap());
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["nested"], json!({"y": 2}));
        assert_eq!(body["extra"], true);
        assert_eq!(body["model"], "a");
    }

    #[test]
    fn test_parse_json_body_error_has_preview() {
        let err = parse_json_body("Anthropic", "<html>oops</html>").unwrap_err();
        assert!(err.to_string().contains("<html>oops</html>"));
    }
}
