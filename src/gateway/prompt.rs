//! Flattens a loosely-typed request body into system and user prompt text.

use serde_json::Value;

use crate::util::str_field;

const SYSTEM_SECTIONS: [(&str, &str); 3] = [
    ("User Guidelines", "user_guidelines"),
    ("Workspace Guidelines", "workspace_guidelines"),
    ("Rules", "rules"),
];

/// Labels that carry the chat message itself rather than surrounding context.
const MESSAGE_LABELS: [&str; 2] = ["Message", "Prompt"];

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn push_part(parts: &mut Vec<String>, label: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        parts.push(format!("{label}:\n{value}"));
    }
}

/// Guidelines and rules, each as `label:\nvalue`. Arrays are joined by newlines.
#[must_use]
pub fn build_system_text(body: &Value) -> String {
    let mut parts = Vec::new();
    for (label, key) in SYSTEM_SECTIONS {
        match body.get(key) {
            Some(Value::String(text)) => push_part(&mut parts, label, text),
            Some(Value::Array(items)) if !items.is_empty() => {
                let lines: Vec<String> = items
                    .iter()
                    .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                    .collect();
                parts.push(format!("{label}:\n{}", lines.join("\n")));
            }
            _ => {}
        }
    }
    parts.join("\n\n").trim().to_string()
}

fn user_parts(body: &Value) -> Vec<(&'static str, String)> {
    let selected = body
        .get("selected_text")
        .filter(|v| !v.is_null())
        .or_else(|| body.get("selected_code"));
    [
        ("Path", body.get("path")),
        ("Language", body.get("lang")),
        ("Instruction", body.get("instruction")),
        ("Message", body.get("message")),
        ("Prompt", body.get("prompt")),
        ("Prefix", body.get("prefix")),
        ("Selected Text", selected),
        ("Suffix", body.get("suffix")),
        ("Diff", body.get("diff")),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| (label, scalar_text(v))))
    .collect()
}

fn join_parts<'a>(parts: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = Vec::new();
    for (label, value) in parts {
        push_part(&mut out, label, value);
    }
    out.join("\n\n").trim().to_string()
}

/// The full user prompt for non-chat endpoints.
#[must_use]
pub fn build_user_text(body: &Value) -> String {
    let parts = user_parts(body);
    join_parts(parts.iter().map(|(label, value)| (*label, value.as_str())))
}

/// The message a chat turn is about.
#[must_use]
pub fn chat_message(body: &Value) -> &str {
    str_field(body, &["message", "prompt"]).unwrap_or_default()
}

/// Everything from [`build_user_text`] except the message itself.
#[must_use]
pub fn chat_context(body: &Value) -> String {
    let parts = user_parts(body);
    join_parts(
        parts
            .iter()
            .filter(|(label, _)| !MESSAGE_LABELS.contains(label))
            .map(|(label, value)| (*label, value.as_str())),
    )
}

#[must_use]
pub fn requested_model(body: &Value) -> Option<&str> {
    str_field(body, &["model", "model_id", "modelId"])
}
