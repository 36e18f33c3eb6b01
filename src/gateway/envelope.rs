//! Neutral result shapes handed to the caller's `transform`.

use std::pin::Pin;

use futures_util::Stream;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::protocol::nodes::OutputNode;

/// Chunks produced by `Gateway::stream`.
pub type ChunkStream<T> = Pin<Box<dyn Stream<Item = Result<T, GatewayError>> + Send>>;

#[must_use]
pub fn chat_envelope(text: &str, nodes: Vec<OutputNode>, stop_reason: Option<i64>) -> Value {
    let mut envelope = json!({
        "text": text,
        "unknown_blob_names": [],
        "checkpoint_not_found": false,
        "workspace_file_chunks": [],
        "nodes": nodes,
    });
    if let (Some(reason), Value::Object(map)) = (stop_reason, &mut envelope) {
        map.insert("stop_reason".to_string(), json!(reason));
    }
    envelope
}

#[must_use]
pub fn completion_envelope(text: &str) -> Value {
    json!({
        "completion_items": [{"text": text, "suffix_replacement_text": "", "skipped_suffix": ""}],
        "unknown_blob_names": [],
        "checkpoint_not_found": false,
        "suggested_prefix_char_count": 0,
        "suggested_suffix_char_count": 0,
        "completion_timeout_ms": 0,
    })
}

#[must_use]
pub fn edit_envelope(text: &str) -> Value {
    json!({"text": text, "unknown_blob_names": [], "checkpoint_not_found": false})
}

#[must_use]
pub fn bare_text(text: &str) -> Value {
    json!({"text": text})
}

fn char_offset(value: Option<&Value>) -> Option<i64> {
    value.and_then(crate::util::loose_i64)
}

/// The single `next-edit-stream` suggestion built around the model's code.
#[must_use]
pub fn next_edit_suggestion(body: &Value, suggested_code: &str, now_ms: u64) -> Value {
    let text_field = |key: &str| crate::util::str_field(body, &[key]).unwrap_or_default().to_string();
    let char_start = char_offset(body.get("selection_begin_char")).unwrap_or(0);
    let char_end = char_offset(body.get("selection_end_char"))
        .filter(|end| *end != 0)
        .unwrap_or(char_start);
    json!({
        "next_edit": {
            "suggestion_id": format!("byok-{now_ms}"),
            "path": text_field("path"),
            "blob_name": text_field("blob_name"),
            "char_start": char_start,
            "char_end": char_end,
            "existing_code": text_field("selected_text"),
            "suggested_code": suggested_code,
            "truncation_char": null,
            "change_description": "",
            "diff_spans": [],
            "editing_score": 1,
            "localization_score": 1,
            "editing_score_threshold": 1,
        },
        "unknown_blob_names": [],
        "checkpoint_not_found": false,
    })
}
