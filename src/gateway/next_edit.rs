//! Next-edit location suggestion: prompt assembly and strict parsing of the
//! model's JSON answer.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::{json, Map, Value};

use crate::error::GatewayError;
use crate::util::{loose_f64, str_field, truncate_inline};

pub const DEFAULT_NUM_RESULTS: u64 = 5;
pub const MAX_NUM_RESULTS: u64 = 10;

const EVENTS_MAX_FILES: usize = 6;
const EVENTS_MAX_EDITS_PER_FILE: usize = 6;
const FIELD_MAX_CHARS: usize = 200;

const SCHEMA: &str = "{candidate_locations:[{item:{path:string,range:{start:number,stop:number}},score:number,debug_info:string}],unknown_blob_names:[],checkpoint_not_found:false,critical_errors:[]}";

/// `num_results` (or `numResults`) floored and clamped to `1..=10`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn num_results(body: &Value) -> u64 {
    let raw = body
        .get("num_results")
        .filter(|v| !v.is_null())
        .or_else(|| body.get("numResults"))
        .and_then(loose_f64);
    match raw {
        Some(n) => n.floor().clamp(1.0, MAX_NUM_RESULTS as f64) as u64,
        None => DEFAULT_NUM_RESULTS,
    }
}

fn position(value: Option<&Value>) -> String {
    value
        .and_then(loose_f64)
        .map_or_else(|| "?".to_string(), |n| n.to_string())
}

/// Compact summary of recent edits, at most 6 files with 6 edits each.
#[must_use]
pub fn format_edit_events(events: Option<&Value>) -> String {
    let Some(events) = events.and_then(Value::as_array) else {
        return String::new();
    };
    let mut lines = Vec::new();
    for event in events.iter().take(EVENTS_MAX_FILES) {
        let path = event
            .get("path")
            .and_then(Value::as_str)
            .map(|p| truncate_inline(p, FIELD_MAX_CHARS))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "(unknown)".to_string());
        let edits = event.get("edits").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
        lines.push(format!("- file: {path} edits={}", edits.len()));
        for edit in edits.iter().take(EVENTS_MAX_EDITS_PER_FILE) {
            let before = edit.get("before_text").and_then(Value::as_str).unwrap_or_default();
            let after = edit.get("after_text").and_then(Value::as_str).unwrap_or_default();
            lines.push(format!(
                "  - edit: after_start={} before_start={} before=\"{}\" after=\"{}\"",
                position(edit.get("after_start")),
                position(edit.get("before_start")),
                truncate_inline(before, FIELD_MAX_CHARS),
                truncate_inline(after, FIELD_MAX_CHARS),
            ));
        }
    }
    lines.join("\n").trim().to_string()
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt pinning the output schema, followed by the caller's guidelines.
#[must_use]
pub fn system_prompt(base_system: &str, max: u64) -> String {
    join_nonempty(&[
        "Respond with JSON only. No Markdown, explanations, code fences or any other text.".to_string(),
        format!("Output schema: {SCHEMA}"),
        "range.start/range.stop are a 0-based line range and must satisfy stop > start and start >= 0."
            .to_string(),
        format!("candidate_locations count <= {max}."),
        base_system.to_string(),
    ])
}

#[must_use]
pub fn user_prompt(base_user: &str, body: &Value, max: u64) -> String {
    let instruction = str_field(body, &["instruction"]).unwrap_or_default();
    let path = str_field(body, &["path"]).unwrap_or_default();
    let events = format_edit_events(body.get("edit_events").filter(|v| !v.is_null()).or_else(|| body.get("editEvents")));
    join_nonempty(&[
        base_user.to_string(),
        if instruction.is_empty() { String::new() } else { format!("Instruction:\n{instruction}") },
        if path.is_empty() { String::new() } else { format!("Path:\n{path}") },
        format!("num_results: {max}"),
        if events.is_empty() { String::new() } else { format!("edit_events:\n{events}") },
    ])
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Contents of the first fenced block, or the trimmed text when unfenced.
#[must_use]
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    fence_pattern()
        .and_then(|fence| fence.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str().trim())
}

/// Parse model output as JSON, falling back to the outermost `{...}` span.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] for empty output or output that does
/// not parse either way.
pub fn parse_model_json(text: &str) -> Result<Value, GatewayError> {
    let raw = strip_markdown_fences(text);
    if raw.is_empty() {
        return Err(GatewayError::Protocol("model returned empty text".to_string()));
    }
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&raw[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(GatewayError::protocol_with_preview("model output is not valid JSON", raw))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn line_number(value: Option<&Value>) -> Option<u64> {
    let n = value.and_then(loose_f64)?;
    (n >= 0.0 && n.fract() == 0.0).then_some(n as u64)
}

fn candidate(raw: &Value, fallback_path: &str) -> Option<Value> {
    let item = raw.get("item");
    let path = item
        .and_then(|i| str_field(i, &["path"]))
        .unwrap_or(fallback_path.trim());
    if path.is_empty() {
        return None;
    }
    let range = item.and_then(|i| i.get("range"));
    let start = line_number(range.and_then(|r| r.get("start")))?;
    let stop = line_number(range.and_then(|r| r.get("stop")))?;
    if stop <= start {
        return None;
    }
    let score = raw.get("score").and_then(loose_f64).unwrap_or(0.0);
    let debug_info = raw
        .get("debug_info")
        .filter(|v| !v.is_null())
        .or_else(|| raw.get("debugInfo"))
        .and_then(Value::as_str)
        .map(|s| truncate_inline(s, FIELD_MAX_CHARS))
        .unwrap_or_default();
    Some(json!({
        "item": {"path": path, "range": {"start": start, "stop": stop}},
        "score": score,
        "debug_info": debug_info,
    }))
}

/// Valid candidates in order, clipped to `max`.
#[must_use]
pub fn normalize_candidates(raw: Option<&Value>, fallback_path: &str, max: u64) -> Vec<Value> {
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    raw.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| candidate(c, fallback_path))
                .take(max)
                .collect()
        })
        .unwrap_or_default()
}

/// Turn raw model output into the `next_edit_loc` result object.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when the output is not a JSON object or
/// yields no valid candidate.
pub fn parse_locations(text: &str, fallback_path: &str, max: u64) -> Result<Value, GatewayError> {
    let parsed = parse_model_json(text)?;
    let Value::Object(parsed) = parsed else {
        return Err(GatewayError::protocol_with_preview(
            "next_edit_loc output is not a JSON object",
            text,
        ));
    };
    let candidates = normalize_candidates(parsed.get("candidate_locations"), fallback_path, max);
    if candidates.is_empty() {
        return Err(GatewayError::protocol_with_preview(
            "next_edit_loc candidate_locations is empty or malformed",
            text,
        ));
    }
    let mut out = Map::new();
    out.insert("candidate_locations".to_string(), Value::Array(candidates));
    out.insert("unknown_blob_names".to_string(), json!([]));
    out.insert("checkpoint_not_found".to_string(), Value::Bool(false));
    out.insert("critical_errors".to_string(), json!([]));
    Ok(Value::Object(out))
}
