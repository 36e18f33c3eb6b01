use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Maximum characters quoted from upstream or model output in error messages.
pub(crate) const PREVIEW_CHARS: usize = 200;

#[inline]
pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Whitespace-collapsed, length-bounded preview of a payload.
#[must_use]
pub(crate) fn preview(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    collapsed.chars().take(PREVIEW_CHARS).collect()
}

/// First `max_chars` characters of `text` without collapsing whitespace.
#[must_use]
pub(crate) fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[must_use]
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Collapse whitespace and clip to `max_chars`, appending `…` when clipped.
#[must_use]
pub(crate) fn truncate_inline(text: &str, max_chars: usize) -> String {
    let one_line = collapse_whitespace(text);
    if one_line.chars().count() <= max_chars {
        return one_line;
    }
    let mut out = take_chars(&one_line, max_chars).to_string();
    out.push('…');
    out
}

/// Endpoint names are compared after trimming and stripping leading slashes.
#[must_use]
pub fn normalize_endpoint(raw: &str) -> String {
    raw.trim().trim_start_matches('/').trim().to_string()
}

/// First key whose value is a non-blank string, trimmed.
#[must_use]
pub(crate) fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    })
}

/// First key present and not null.
#[must_use]
pub(crate) fn any_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
}

/// Loose numeric read: JSON numbers and numeric strings, finite only.
#[must_use]
pub(crate) fn loose_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Loose integer read used by node payloads (`format`, ids, timestamps).
#[must_use]
pub(crate) fn loose_i64(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    #[allow(clippy::cast_possible_truncation)]
    loose_f64(value).map(|f| f.trunc() as i64)
}

/// Error flags arrive as booleans, numbers, or strings.
#[must_use]
pub(crate) fn loose_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => false,
    }
}
