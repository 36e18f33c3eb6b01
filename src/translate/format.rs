//! Renders metadata nodes into bracketed text blocks for backends that only
//! see plain text.

use base64::Engine;
use serde_json::Value;

use crate::protocol::nodes::StructuredNode;
use crate::util::{any_field, loose_i64, take_chars, truncate_inline};

const MAX_LIST_ITEMS: usize = 6;
const MAX_WORKSPACE_FOLDERS: usize = 8;
const MAX_INLINE_FILE_CHARS: usize = 20_000;

/// Collects `key=value` lines between `[TAG]` and `[/TAG]`.
struct TaggedBlock {
    tag: &'static str,
    lines: Vec<String>,
}

impl TaggedBlock {
    fn new(tag: &'static str) -> Self {
        Self {
            tag,
            lines: Vec::new(),
        }
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    fn push_non_empty(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.lines.push(format!("{key}={value}"));
        }
    }

    /// `None` when nothing was pushed.
    fn finish(self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        Some(format!(
            "[{tag}]\n{body}\n[/{tag}]",
            tag = self.tag,
            body = self.lines.join("\n")
        ))
    }
}

/// Scalar field as single-line text. Objects and arrays are skipped.
fn inline(value: &Value, keys: &[&str], max_chars: usize) -> String {
    match any_field(value, keys) {
        Some(Value::String(s)) => truncate_inline(s, max_chars),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => truncate_inline(&v.to_string(), max_chars),
        _ => String::new(),
    }
}

fn int_or_unknown(value: &Value, keys: &[&str]) -> String {
    any_field(value, keys)
        .and_then(loose_i64)
        .map_or_else(|| "?".to_string(), |n| n.to_string())
}

fn or_unknown(text: &str) -> &str {
    if text.is_empty() {
        "(unknown)"
    } else {
        text
    }
}

fn array<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    any_field(value, keys)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

#[must_use]
pub fn format_ide_state(node: &Value) -> Option<String> {
    let mut block = TaggedBlock::new("IDE_STATE");
    if let Some(unchanged) =
        any_field(node, &["workspace_folders_unchanged", "workspaceFoldersUnchanged"]).and_then(Value::as_bool)
    {
        block.push(format!("workspace_folders_unchanged={unchanged}"));
    }

    let folders: Vec<String> = array(node, &["workspace_folders", "workspaceFolders"])
        .iter()
        .take(MAX_WORKSPACE_FOLDERS)
        .filter_map(|folder| {
            let repo = inline(folder, &["repository_root", "repositoryRoot"], 200);
            let root = inline(folder, &["folder_root", "folderRoot"], 200);
            if repo.is_empty() && root.is_empty() {
                return None;
            }
            Some(format!(
                "- repository_root={} folder_root={}",
                or_unknown(&repo),
                or_unknown(&root)
            ))
        })
        .collect();
    if !folders.is_empty() {
        block.push("workspace_folders:".to_string());
        block.lines.extend(folders);
    }

    if let Some(terminal) =
        any_field(node, &["current_terminal", "currentTerminal"]).filter(|t| t.is_object())
    {
        let id = any_field(terminal, &["terminal_id", "terminalId"]).and_then(loose_i64);
        let cwd = inline(
            terminal,
            &["current_working_directory", "currentWorkingDirectory"],
            200,
        );
        if id.is_some() || !cwd.is_empty() {
            block.push(format!(
                "current_terminal: id={} cwd={}",
                id.map_or_else(|| "?".to_string(), |n| n.to_string()),
                or_unknown(&cwd)
            ));
        }
    }
    block.finish()
}

#[must_use]
pub fn format_edit_events(node: &Value) -> Option<String> {
    let mut block = TaggedBlock::new("EDIT_EVENTS");
    block.push_non_empty("source", &inline(node, &["source"], 200));

    for event in array(node, &["edit_events", "editEvents"])
        .iter()
        .take(MAX_LIST_ITEMS)
        .filter(|e| e.is_object())
    {
        let path = inline(event, &["path"], 200);
        let before = inline(event, &["before_blob_name", "beforeBlobName"], 120);
        let after = inline(event, &["after_blob_name", "afterBlobName"], 120);
        let edits = array(event, &["edits"]);

        let mut line = format!("- file: {} edits={}", or_unknown(&path), edits.len());
        if !before.is_empty() {
            line.push_str(&format!(" before={before}"));
        }
        if !after.is_empty() {
            line.push_str(&format!(" after={after}"));
        }
        block.push(line);

        for edit in edits.iter().take(MAX_LIST_ITEMS).filter(|e| e.is_object()) {
            block.push(format!(
                "  - edit: after_line_start={} before_line_start={} before=\"{}\" after=\"{}\"",
                int_or_unknown(edit, &["after_line_start", "afterLineStart"]),
                int_or_unknown(edit, &["before_line_start", "beforeLineStart"]),
                inline(edit, &["before_text", "beforeText"], 200),
                inline(edit, &["after_text", "afterText"], 200),
            ));
        }
    }
    block.finish()
}

#[must_use]
pub fn format_checkpoint_ref(node: &Value) -> Option<String> {
    let mut block = TaggedBlock::new("CHECKPOINT_REF");
    block.push_non_empty("request_id", &inline(node, &["request_id", "requestId"], 120));

    let from = any_field(node, &["from_timestamp", "fromTimestamp"]).and_then(loose_i64);
    let to = any_field(node, &["to_timestamp", "toTimestamp"]).and_then(loose_i64);
    if from.is_some() || to.is_some() {
        block.push(format!(
            "from_timestamp={} to_timestamp={}",
            int_or_unknown(node, &["from_timestamp", "fromTimestamp"]),
            int_or_unknown(node, &["to_timestamp", "toTimestamp"]),
        ));
    }
    block.push_non_empty("source", &inline(node, &["source"], 200));
    block.finish()
}

fn persona_label(value: Option<&Value>) -> &'static str {
    match value.and_then(loose_i64) {
        Some(1) => "PROTOTYPER",
        Some(2) => "BRAINSTORM",
        Some(3) => "REVIEWER",
        _ => "DEFAULT",
    }
}

/// Always renders: a persona change with no fields still selects `DEFAULT`.
#[must_use]
pub fn format_persona_change(node: &Value) -> Option<String> {
    let mut block = TaggedBlock::new("CHANGE_PERSONALITY");
    block.push(format!(
        "personality_type={}",
        persona_label(any_field(node, &["personality_type", "personalityType"]))
    ));
    block.push_non_empty(
        "custom_instructions",
        &inline(node, &["custom_instructions", "customInstructions"], 1000),
    );
    block.finish()
}

#[must_use]
pub fn format_image_ref(node: &Value) -> Option<String> {
    let id = inline(node, &["image_id", "imageId"], 200);
    if id.is_empty() {
        return None;
    }
    Some(format!(
        "[IMAGE_ID] image_id={id} format={}",
        int_or_unknown(node, &["format"])
    ))
}

#[must_use]
pub fn format_file_ref(node: &Value) -> Option<String> {
    let id = inline(node, &["file_id", "fileId"], 200);
    let name = inline(node, &["file_name", "fileName"], 200);
    if id.is_empty() && name.is_empty() {
        return None;
    }
    Some(format!(
        "[FILE_ID] file_name={} file_id={}",
        or_unknown(&name),
        or_unknown(&id)
    ))
}

fn is_text_like(format: &str) -> bool {
    format.starts_with("text/")
        || matches!(
            format,
            "application/json"
                | "application/xml"
                | "application/yaml"
                | "application/x-yaml"
                | "application/markdown"
        )
}

/// Inline attachment. Only text-like formats are decoded and shown.
#[must_use]
pub fn format_file(node: &Value) -> Option<String> {
    let format = crate::util::str_field(node, &["format"]).unwrap_or("application/octet-stream");
    let raw = crate::util::str_field(node, &["file_data", "fileData"]).unwrap_or_default();
    if raw.is_empty() {
        return Some(format!("[FILE] format={format} (empty)"));
    }

    let encoded = raw
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map_or(raw, |(_, data)| data);
    let approx_bytes = encoded.len() * 3 / 4;
    if !is_text_like(format) {
        return Some(format!(
            "[FILE] format={format} bytes≈{approx_bytes} (content omitted)"
        ));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());
    let Some(content) = decoded else {
        return Some(format!(
            "[FILE] format={format} bytes≈{approx_bytes} (decode failed)"
        ));
    };
    let mut body = take_chars(&content, MAX_INLINE_FILE_CHARS).to_string();
    if body.len() < content.len() {
        body.push_str("\n\n[Content truncated due to length...]");
    }
    Some(
        format!("[FILE] format={format} bytes≈{approx_bytes}\n\n{body}")
            .trim()
            .to_string(),
    )
}

#[must_use]
pub fn format_history_summary(node: &Value) -> Option<String> {
    let mut block = TaggedBlock::new("HISTORY_SUMMARY");
    block.push_non_empty(
        "summarization_request_id",
        &inline(node, &["summarization_request_id", "summarizationRequestId"], 120),
    );
    if let Some(dropped) = any_field(
        node,
        &[
            "history_beginning_dropped_num_exchanges",
            "historyBeginningDroppedNumExchanges",
        ],
    )
    .and_then(loose_i64)
    {
        block.push(format!("history_beginning_dropped_num_exchanges={dropped}"));
    }
    block.push_non_empty(
        "message_template",
        &inline(node, &["message_template", "messageTemplate"], 400),
    );
    block.push_non_empty(
        "summary_text",
        &inline(node, &["summary_text", "summaryText"], 3000),
    );
    block.push_non_empty(
        "history_middle_abridged_text",
        &inline(
            node,
            &["history_middle_abridged_text", "historyMiddleAbridgedText"],
            2000,
        ),
    );
    let end = array(node, &["history_end", "historyEnd"]).len();
    if end > 0 {
        block.push(format!("history_end_exchanges={end}"));
    }
    block.finish()
}

/// Text rendering of a metadata node; `None` for content nodes and for
/// metadata with nothing worth showing.
#[must_use]
pub fn render_metadata(node: &StructuredNode) -> Option<String> {
    match node {
        StructuredNode::ImageRef(v) => format_image_ref(v),
        StructuredNode::IdeState(v) => format_ide_state(v),
        StructuredNode::EditEvents(v) => format_edit_events(v),
        StructuredNode::CheckpointRef(v) => format_checkpoint_ref(v),
        StructuredNode::PersonaChange(v) => format_persona_change(v),
        StructuredNode::File(v) => format_file(v),
        StructuredNode::FileRef(v) => format_file_ref(v),
        StructuredNode::HistorySummary(v) => format_history_summary(v),
        StructuredNode::Text(_) | StructuredNode::ToolResult(_) | StructuredNode::Image { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ide_state_block() {
        let out = format_ide_state(&json!({
            "workspaceFoldersUnchanged": false,
            "workspace_folders": [
                {"repository_root": "/repo", "folder_root": "/repo/app"},
                {"folderRoot": "/other"},
                {}
            ],
            "current_terminal": {"terminal_id": 3}
        }))
        .unwrap();
        assert_eq!(
            out,
            "[IDE_STATE]\n\
             workspace_folders_unchanged=false\n\
             workspace_folders:\n\
             - repository_root=/repo folder_root=/repo/app\n\
             - repository_root=(unknown) folder_root=/other\n\
             current_terminal: id=3 cwd=(unknown)\n\
             [/IDE_STATE]"
        );
    }

    #[test]
    fn test_empty_metadata_renders_nothing() {
        assert_eq!(format_ide_state(&json!({})), None);
        assert_eq!(format_edit_events(&json!({"edit_events": []})), None);
        assert_eq!(format_checkpoint_ref(&json!({})), None);
        assert_eq!(format_image_ref(&json!({"format": 1})), None);
        assert_eq!(format_history_summary(&json!({"history_end": []})), None);
    }

    #[test]
    fn test_edit_events_truncate_and_cap() {
        let edits: Vec<Value> = (0..9)
            .map(|i| json!({"after_line_start": i, "before_text": "x".repeat(300), "after_text": "y"}))
            .collect();
        let out = format_edit_events(&json!({
            "source": "user",
            "edit_events": [{"path": "src/a.rs", "after_blob_name": "b2", "edits": edits}]
        }))
        .unwrap();
        assert!(out.contains("- file: src/a.rs edits=9 after=b2"));
        assert_eq!(out.matches("  - edit:").count(), 6);
        assert!(out.contains("before_line_start=?"));
        assert!(out.contains(&format!("before=\"{}…\"", "x".repeat(200))));
    }

    #[test]
    fn test_persona_labels() {
        let out = format_persona_change(&json!({"personality_type": 3})).unwrap();
        assert!(out.contains("personality_type=REVIEWER"));
        let out = format_persona_change(&json!({})).unwrap();
        assert!(out.contains("personality_type=DEFAULT"));
    }

    #[test]
    fn test_file_node_text_and_binary() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("hello file");
        let out = format_file(&json!({
            "file_data": format!("data:text/plain;base64,{encoded}"),
            "format": "text/plain"
        }))
        .unwrap();
        assert!(out.starts_with("[FILE] format=text/plain bytes≈"));
        assert!(out.ends_with("hello file"));

        let out = format_file(&json!({"file_data": "AAAA", "format": "application/pdf"})).unwrap();
        assert_eq!(out, "[FILE] format=application/pdf bytes≈3 (content omitted)");

        let out = format_file(&json!({"format": "text/plain"})).unwrap();
        assert_eq!(out, "[FILE] format=text/plain (empty)");

        let out = format_file(&json!({"file_data": "@@@", "format": "application/json"})).unwrap();
        assert!(out.ends_with("(decode failed)"));
    }

    #[test]
    fn test_refs_and_history_summary() {
        assert_eq!(
            format_file_ref(&json!({"fileId": "f-1"})).unwrap(),
            "[FILE_ID] file_name=(unknown) file_id=f-1"
        );
        assert_eq!(
            format_image_ref(&json!({"image_id": "img"})).unwrap(),
            "[IMAGE_ID] image_id=img format=?"
        );
        let out = format_history_summary(&json!({
            "summary_text": "earlier work",
            "history_beginning_dropped_num_exchanges": 4,
            "history_end": [{}, {}]
        }))
        .unwrap();
        assert!(out.contains("summary_text=earlier work"));
        assert!(out.contains("history_beginning_dropped_num_exchanges=4"));
        assert!(out.contains("history_end_exchanges=2"));
    }
}
