//! Structured chat turns to backend-native messages.
//!
//! A turn is the optional system text, the replayed history, and the current
//! user message plus its structured nodes. Tool results for a turn's tool
//! calls arrive in the *next* exchange's request nodes, so history replay
//! always looks one exchange ahead.

pub mod format;

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::protocol::anthropic::{AnthropicContentBlock, AnthropicMessage, AnthropicToolResultContent};
use crate::protocol::canonical::{ToolDefinition, ToolResult, ToolResultPart, ToolUse};
use crate::protocol::nodes::{ChatExchange, StructuredNode};
use crate::protocol::openai_chat::{OpenAiFunctionCall, OpenAiMessage, OpenAiToolCall};
use crate::util::{any_field, str_field};

/// Stands in for a tool call whose result the host never sent back.
pub const MISSING_TOOL_RESULT: &str = "[Tool result not available]";

const MAX_PLACEHOLDER_LEN: usize = 16;

/// Short dash-only strings (`-`, `---`) some clients send as an empty message.
#[must_use]
pub fn is_placeholder(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty() && text.len() <= MAX_PLACEHOLDER_LEN && text.bytes().all(|b| b == b'-')
}

/// MIME type for a numeric image format code.
#[must_use]
pub fn image_media_type(format: i64) -> &'static str {
    match format {
        2 => "image/jpeg",
        3 => "image/gif",
        4 => "image/webp",
        _ => "image/png",
    }
}

/// One ordered piece of user content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Image {
        media_type: &'static str,
        data: String,
    },
}

/// Everything needed to build one request's message list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatTurn<'a> {
    pub system: &'a str,
    pub history: &'a [ChatExchange],
    pub message: &'a str,
    pub nodes: &'a [StructuredNode],
    /// Extra context (path, selection, ...) appended after the nodes.
    pub context: &'a str,
}

impl<'a> ChatTurn<'a> {
    /// A single user message with no history.
    #[must_use]
    pub fn plain(system: &'a str, user: &'a str) -> Self {
        Self {
            system,
            message: user,
            ..Self::default()
        }
    }
}

struct SegmentBuilder {
    segments: Vec<Segment>,
    last_text: Option<String>,
}

impl SegmentBuilder {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            last_text: None,
        }
    }

    fn text(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() || is_placeholder(trimmed) {
            return;
        }
        if self.last_text.as_deref() == Some(trimmed) {
            return;
        }
        self.last_text = Some(trimmed.to_string());
        self.segments.push(Segment::Text(trimmed.to_string()));
    }

    fn image(&mut self, format: i64, data: &str) {
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        self.last_text = None;
        self.segments.push(Segment::Image {
            media_type: image_media_type(format),
            data: data.to_string(),
        });
    }
}

/// Ordered user content for one turn. Tool results are excluded.
///
/// The plain message comes first; a text node repeating it is dropped, as
/// are adjacent duplicate texts and dash-only placeholders.
#[must_use]
pub fn user_segments(message: &str, nodes: &[StructuredNode], context: &str) -> Vec<Segment> {
    let mut builder = SegmentBuilder::new();
    let message = message.trim();
    let repeated = (!message.is_empty() && !is_placeholder(message)).then_some(message);
    builder.text(message);

    for node in nodes {
        match node {
            StructuredNode::Text(text) => {
                if repeated == Some(text.trim()) {
                    continue;
                }
                builder.text(text);
            }
            StructuredNode::Image { format, data } => builder.image(*format, data),
            StructuredNode::ToolResult(_) => {}
            other => {
                if let Some(rendered) = format::render_metadata(other) {
                    builder.text(&rendered);
                }
            }
        }
    }
    builder.text(context);
    builder.segments
}

/// Text segments joined by blank lines; images are dropped.
#[must_use]
pub fn segments_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text(text) => Some(text.as_str()),
            Segment::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `OpenAI` content: a string when text-only, a part array once images appear.
#[must_use]
pub fn openai_content(segments: &[Segment]) -> Option<Value> {
    if segments.is_empty() {
        return None;
    }
    if !segments.iter().any(|s| matches!(s, Segment::Image { .. })) {
        return Some(Value::String(segments_text(segments)));
    }
    let parts = segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => json!({"type": "text", "text": text}),
            Segment::Image { media_type, data } => json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{media_type};base64,{data}")}
            }),
        })
        .collect();
    Some(Value::Array(parts))
}

fn anthropic_blocks(segments: Vec<Segment>) -> Vec<AnthropicContentBlock> {
    segments
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(text) => AnthropicContentBlock::text(text),
            Segment::Image { media_type, data } => AnthropicContentBlock::base64_image(media_type, &data),
        })
        .collect()
}

/// Pairs each tool call with its result, or `None` when the host sent none.
/// Results that answer no call are dropped.
fn pair_results<'r>(
    tool_uses: &[ToolUse],
    results: impl IntoIterator<Item = &'r ToolResult>,
) -> Vec<(String, Option<&'r ToolResult>)> {
    let results: Vec<&ToolResult> = results.into_iter().collect();
    let expected: HashSet<&str> = tool_uses.iter().map(|t| t.id.as_str()).collect();
    for orphan in results.iter().filter(|r| !expected.contains(r.tool_use_id.as_str())) {
        tracing::debug!(tool_use_id = %orphan.tool_use_id, "dropping tool result without a matching tool call");
    }
    tool_uses
        .iter()
        .map(|tool| {
            let result = results.iter().copied().find(|r| r.tool_use_id == tool.id);
            (tool.id.clone(), result)
        })
        .collect()
}

fn current_results(nodes: &[StructuredNode]) -> impl Iterator<Item = &ToolResult> {
    nodes.iter().filter_map(StructuredNode::as_tool_result)
}

/// Tool result as plain text: parts joined, images summarized, falling back
/// to the result's own text.
#[must_use]
pub fn tool_result_text(result: &ToolResult) -> String {
    let mut pieces: Vec<String> = Vec::new();
    let mut last: Option<&str> = None;
    for part in &result.parts {
        match part {
            ToolResultPart::Text(text) => {
                let text = text.trim();
                if text.is_empty() || is_placeholder(text) || last == Some(text) {
                    continue;
                }
                last = Some(text);
                pieces.push(text.to_string());
            }
            ToolResultPart::Image { format, data } => {
                last = None;
                pieces.push(format!(
                    "[image omitted: format={format} bytes≈{}]",
                    data.trim().len() * 3 / 4
                ));
            }
        }
    }
    if pieces.is_empty() {
        result.text.clone()
    } else {
        pieces.join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// OpenAI-style
// ---------------------------------------------------------------------------

fn openai_tool_messages(paired: Vec<(String, Option<&ToolResult>)>, out: &mut Vec<OpenAiMessage>) {
    for (id, result) in paired {
        let content = result.map_or_else(|| MISSING_TOOL_RESULT.to_string(), tool_result_text);
        out.push(OpenAiMessage::tool(&id, content));
    }
}

/// Chat Completions message list for a turn.
#[must_use]
pub fn to_openai_messages(turn: &ChatTurn<'_>) -> Vec<OpenAiMessage> {
    let mut out = Vec::new();
    if !turn.system.trim().is_empty() {
        out.push(OpenAiMessage::text("system", turn.system.trim()));
    }

    for (index, exchange) in turn.history.iter().enumerate() {
        let segments = user_segments(&exchange.request_message, &exchange.request_nodes, "");
        if let Some(content) = openai_content(&segments) {
            out.push(OpenAiMessage {
                content: Some(content),
                ..OpenAiMessage::text("user", "")
            });
        }

        let tool_uses = exchange.tool_uses();
        let text = exchange.assistant_text();
        if !tool_uses.is_empty() || !text.is_empty() {
            out.push(OpenAiMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then(|| Value::String(text)),
                tool_calls: (!tool_uses.is_empty()).then(|| tool_uses.iter().map(openai_tool_call).collect()),
                tool_call_id: None,
            });
        }

        // The last exchange's results live on the current turn.
        if tool_uses.is_empty() {
            continue;
        }
        match turn.history.get(index + 1) {
            Some(next) => openai_tool_messages(pair_results(&tool_uses, next.tool_results()), &mut out),
            None => openai_tool_messages(pair_results(&tool_uses, current_results(turn.nodes)), &mut out),
        }
    }

    let segments = user_segments(turn.message, turn.nodes, turn.context);
    if let Some(content) = openai_content(&segments) {
        out.push(OpenAiMessage {
            content: Some(content),
            ..OpenAiMessage::text("user", "")
        });
    }
    out
}

#[must_use]
pub fn openai_tool_call(tool: &ToolUse) -> OpenAiToolCall {
    let arguments = if tool.input_json.trim().is_empty() {
        "{}".to_string()
    } else {
        tool.input_json.clone()
    };
    OpenAiToolCall {
        id: tool.id.clone(),
        type_: "function".to_string(),
        function: OpenAiFunctionCall {
            name: tool.name.clone(),
            arguments,
        },
    }
}

// ---------------------------------------------------------------------------
// Anthropic-style
// ---------------------------------------------------------------------------

fn anthropic_tool_result(id: String, result: Option<&ToolResult>) -> AnthropicContentBlock {
    let Some(result) = result else {
        return AnthropicContentBlock::ToolResult {
            tool_use_id: id,
            content: AnthropicToolResultContent::Text(MISSING_TOOL_RESULT.to_string()),
            is_error: false,
        };
    };

    let mut blocks = Vec::new();
    let mut last: Option<&str> = None;
    for part in &result.parts {
        match part {
            ToolResultPart::Text(text) => {
                let text = text.trim();
                if text.is_empty() || is_placeholder(text) || last == Some(text) {
                    continue;
                }
                last = Some(text);
                blocks.push(AnthropicContentBlock::text(text));
            }
            ToolResultPart::Image { format, data } if !data.trim().is_empty() => {
                last = None;
                blocks.push(AnthropicContentBlock::base64_image(image_media_type(*format), data.trim()));
            }
            ToolResultPart::Image { .. } => {}
        }
    }
    let content = if blocks.is_empty() {
        AnthropicToolResultContent::Text(result.text.clone())
    } else {
        AnthropicToolResultContent::Blocks(blocks)
    };
    AnthropicContentBlock::ToolResult {
        tool_use_id: id,
        content,
        is_error: result.is_error,
    }
}

/// Appends, merging into the previous message when the role repeats.
fn push_anthropic(out: &mut Vec<AnthropicMessage>, role: &str, mut content: Vec<AnthropicContentBlock>) {
    if content.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut().filter(|m| m.role == role) {
        last.content.append(&mut content);
        return;
    }
    out.push(AnthropicMessage::new(role, content));
}

/// Messages API message list for a turn. The system text travels separately.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when a replayed tool call's input is
/// not a JSON object.
pub fn to_anthropic_messages(turn: &ChatTurn<'_>) -> Result<Vec<AnthropicMessage>, GatewayError> {
    let mut out = Vec::new();
    let mut pending: Vec<ToolUse> = Vec::new();

    for exchange in turn.history {
        let mut content: Vec<AnthropicContentBlock> = pair_results(&pending, exchange.tool_results())
            .into_iter()
            .map(|(id, result)| anthropic_tool_result(id, result))
            .collect();
        content.extend(anthropic_blocks(user_segments(
            &exchange.request_message,
            &exchange.request_nodes,
            "",
        )));
        push_anthropic(&mut out, "user", content);

        let text = exchange.assistant_text();
        let tool_uses = exchange.tool_uses();
        let mut assistant = Vec::with_capacity(tool_uses.len() + 1);
        if !text.is_empty() {
            assistant.push(AnthropicContentBlock::text(text));
        }
        for tool in &tool_uses {
            assistant.push(AnthropicContentBlock::ToolUse {
                id: tool.id.clone(),
                name: tool.name.clone(),
                input: Value::Object(tool.input_object()?),
            });
        }
        push_anthropic(&mut out, "assistant", assistant);
        pending = tool_uses;
    }

    let mut content: Vec<AnthropicContentBlock> = pair_results(&pending, current_results(turn.nodes))
        .into_iter()
        .map(|(id, result)| anthropic_tool_result(id, result))
        .collect();
    content.extend(anthropic_blocks(user_segments(turn.message, turn.nodes, turn.context)));
    push_anthropic(&mut out, "user", content);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Text-only
// ---------------------------------------------------------------------------

/// Single prompt string for text-only backends.
///
/// Without history this is just the user content; with history each earlier
/// exchange is replayed as labelled `User:` / `Assistant:` sections.
#[must_use]
pub fn to_text_prompt(turn: &ChatTurn<'_>) -> String {
    let current = segments_text(&user_segments(turn.message, turn.nodes, turn.context));
    if turn.history.is_empty() {
        return current;
    }
    let mut sections = Vec::with_capacity(turn.history.len() * 2 + 1);
    for exchange in turn.history {
        let user = segments_text(&user_segments(&exchange.request_message, &exchange.request_nodes, ""));
        if !user.is_empty() {
            sections.push(format!("User:\n{user}"));
        }
        let assistant = exchange.assistant_text();
        if !assistant.is_empty() {
            sections.push(format!("Assistant:\n{assistant}"));
        }
    }
    if !current.is_empty() {
        sections.push(format!("User:\n{current}"));
    }
    sections.join("\n\n")
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// Read `tool_definitions` from a request body.
///
/// Entries without a name are skipped. A blank schema becomes an empty
/// object schema.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] naming the tool when its schema
/// is not a JSON object.
pub fn parse_tool_definitions(body: &Value) -> Result<Vec<ToolDefinition>, GatewayError> {
    let Some(defs) = any_field(body, &["tool_definitions", "toolDefinitions"]).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut tools = Vec::with_capacity(defs.len());
    for def in defs {
        let Some(name) = str_field(def, &["name"]) else {
            continue;
        };
        tools.push(ToolDefinition {
            name: name.to_string(),
            description: str_field(def, &["description"]).map(str::to_string),
            input_schema: parse_input_schema(name, def)?,
        });
    }
    Ok(tools)
}

fn parse_input_schema(name: &str, def: &Value) -> Result<Value, GatewayError> {
    let empty = || json!({"type": "object", "properties": {}});
    let invalid = || GatewayError::InvalidRequest(format!("Tool({name}) input_schema_json is not a JSON object"));
    match any_field(def, &["input_schema_json", "inputSchemaJson", "input_schema"]) {
        None => Ok(empty()),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(empty()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(schema @ Value::Object(_)) => Ok(schema),
            _ => Err(invalid()),
        },
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::response_decoder;
    use crate::protocol::nodes::{parse_chat_history, parse_request_nodes};
    use crate::protocol::openai_chat::response_decoder::decode_tool_calls;

    fn tool_exchange() -> Value {
        json!({
            "request_message": "read a.rs",
            "response_text": "Reading.",
            "response_nodes": [
                {"type": 5, "tool_use": {"tool_use_id": "call_1", "tool_name": "read_file", "input_json": "{\"path\":\"a.rs\",\"opts\":{\"lines\":[1,2]}}"}},
                {"type": 5, "tool_use": {"tool_use_id": "call_2", "tool_name": "list_dir", "input_json": "{}"}}
            ]
        })
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("---"));
        assert!(is_placeholder(" - "));
        assert!(!is_placeholder(&"-".repeat(17)));
        assert!(!is_placeholder(""));
        assert!(!is_placeholder("-a-"));
    }

    #[test]
    fn test_placeholder_message_dropped_entirely() {
        let turn = ChatTurn::plain("", "---");
        assert!(to_openai_messages(&turn).is_empty());
        assert!(to_anthropic_messages(&turn).unwrap().is_empty());
    }

    #[test]
    fn test_message_repeated_by_text_node_is_deduplicated() {
        let nodes = parse_request_nodes(Some(&json!([
            {"type": 0, "text_node": {"content": "hello"}},
            {"type": 0, "text_node": {"content": "world"}},
            {"type": 0, "text_node": {"content": "world"}}
        ])));
        let segments = user_segments(" hello ", &nodes, "");
        assert_eq!(
            segments,
            vec![Segment::Text("hello".into()), Segment::Text("world".into())]
        );
    }

    #[test]
    fn test_images_make_openai_content_an_array() {
        let nodes = parse_request_nodes(Some(&json!([
            {"type": 2, "image_node": {"image_data": "QUJD", "format": 2}},
            {"type": 4, "ide_state_node": {"workspace_folders_unchanged": true}}
        ])));
        let content = openai_content(&user_segments("look", &nodes, "")).unwrap();
        let parts = content.as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
        assert!(parts[2]["text"].as_str().unwrap().starts_with("[IDE_STATE]"));

        let text_only = openai_content(&[Segment::Text("a".into()), Segment::Text("b".into())]).unwrap();
        assert_eq!(text_only, json!("a\n\nb"));
    }

    #[test]
    fn test_openai_history_looks_one_turn_ahead() {
        let history = parse_chat_history(Some(&json!([
            tool_exchange(),
            {
                "request_message": "",
                "request_nodes": [
                    {"type": 1, "tool_result_node": {"tool_use_id": "call_1", "content": "fn main() {}"}},
                    {"type": 1, "tool_result_node": {"tool_use_id": "stray", "content": "ignored"}}
                ],
                "response_text": "Done."
            }
        ])));
        let turn = ChatTurn {
            system: "be brief",
            history: &history,
            message: "thanks",
            ..ChatTurn::default()
        };
        let messages = to_openai_messages(&turn);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "tool", "tool", "assistant", "user"]);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].content, Some(json!("fn main() {}")));
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(messages[4].content, Some(json!(MISSING_TOOL_RESULT)));
    }

    #[test]
    fn test_current_turn_results_attach_to_last_exchange() {
        let history = parse_chat_history(Some(&json!([tool_exchange()])));
        let nodes = parse_request_nodes(Some(&json!([
            {"type": 1, "tool_result_node": {"tool_use_id": "call_2", "content": "a.rs", "is_error": false}}
        ])));
        let turn = ChatTurn {
            history: &history,
            nodes: &nodes,
            ..ChatTurn::default()
        };
        let messages = to_openai_messages(&turn);
        let tools: Vec<(&str, Value)> = messages
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.clone().unwrap()))
            .collect();
        assert_eq!(
            tools,
            vec![("call_1", json!(MISSING_TOOL_RESULT)), ("call_2", json!("a.rs"))]
        );
        assert_eq!(messages.last().unwrap().role, "tool");
    }

    #[test]
    fn test_anthropic_tool_results_lead_next_user_message() {
        let history = parse_chat_history(Some(&json!([tool_exchange()])));
        let nodes = parse_request_nodes(Some(&json!([
            {"type": 1, "tool_result_node": {
                "tool_use_id": "call_1",
                "content": "fallback",
                "is_error": 1,
                "content_nodes": [
                    {"type": 1, "text_content": "line one"},
                    {"type": 2, "image_content": {"image_data": "QUJD", "format": 3}}
                ]
            }}
        ])));
        let turn = ChatTurn {
            history: &history,
            message: "continue",
            nodes: &nodes,
            ..ChatTurn::default()
        };
        let messages = to_anthropic_messages(&turn).unwrap();
        assert_eq!(messages.len(), 3);
        let last = &messages[2];
        assert_eq!(last.role, "user");
        let AnthropicContentBlock::ToolResult {
            tool_use_id,
            content: AnthropicToolResultContent::Blocks(blocks),
            is_error,
        } = &last.content[0]
        else {
            panic!("expected tool_result blocks");
        };
        assert_eq!(tool_use_id, "call_1");
        assert!(*is_error);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&last.content[1], AnthropicContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_2"));
        assert_eq!(last.content[2], AnthropicContentBlock::text("continue"));
    }

    #[test]
    fn test_tool_use_round_trip_openai() {
        let history = parse_chat_history(Some(&json!([tool_exchange()])));
        let messages = to_openai_messages(&ChatTurn {
            history: &history,
            ..ChatTurn::default()
        });
        let assistant = messages.iter().find(|m| m.role == "assistant").unwrap();
        let wire = serde_json::to_value(assistant.tool_calls.as_ref().unwrap()).unwrap();
        let decoded = decode_tool_calls(&wire).unwrap();
        let original = history[0].tool_uses();
        assert_eq!(decoded.len(), original.len());
        for (got, want) in decoded.iter().zip(&original) {
            assert_eq!(got.id, want.id);
            assert_eq!(got.name, want.name);
            assert_eq!(got.input_object().unwrap(), want.input_object().unwrap());
        }
    }

    #[test]
    fn test_tool_use_round_trip_anthropic() {
        let history = parse_chat_history(Some(&json!([tool_exchange()])));
        let messages = to_anthropic_messages(&ChatTurn {
            history: &history,
            ..ChatTurn::default()
        })
        .unwrap();
        let assistant = messages.iter().find(|m| m.role == "assistant").unwrap();
        let wire: Vec<AnthropicContentBlock> =
            serde_json::from_value(serde_json::to_value(&assistant.content).unwrap()).unwrap();
        let decoded = response_decoder::tool_uses(&wire);
        let original = history[0].tool_uses();
        assert_eq!(decoded.len(), 2);
        for (got, want) in decoded.iter().zip(&original) {
            assert_eq!((&got.id, &got.name), (&want.id, &want.name));
            assert_eq!(got.input_object().unwrap(), want.input_object().unwrap());
        }
    }

    #[test]
    fn test_anthropic_merges_repeated_roles() {
        let history = parse_chat_history(Some(&json!([
            {"request_message": "first"},
            {"request_message": "second", "response_text": "ok"}
        ])));
        let messages = to_anthropic_messages(&ChatTurn {
            history: &history,
            message: "third",
            ..ChatTurn::default()
        })
        .unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
        assert_eq!(messages[0].content.len(), 2);
    }

    #[test]
    fn test_text_prompt_replays_history() {
        let history = parse_chat_history(Some(&json!([
            {"request_message": "hi", "response_text": "hello"}
        ])));
        let prompt = to_text_prompt(&ChatTurn {
            history: &history,
            message: "again",
            ..ChatTurn::default()
        });
        assert_eq!(prompt, "User:\nhi\n\nAssistant:\nhello\n\nUser:\nagain");
        assert_eq!(to_text_prompt(&ChatTurn::plain("", "solo")), "solo");
    }

    #[test]
    fn test_parse_tool_definitions() {
        let tools = parse_tool_definitions(&json!({
            "tool_definitions": [
                {"name": "read_file", "description": "Read", "input_schema_json": "{\"type\":\"object\",\"properties\":{\"path\":{\"type\":\"string\"}}}"},
                {"name": "noop", "input_schema_json": "  "},
                {"description": "nameless"}
            ]
        }))
        .unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].input_schema["properties"]["path"]["type"], "string");
        assert_eq!(tools[1].input_schema, json!({"type": "object", "properties": {}}));

        let err = parse_tool_definitions(&json!({
            "tool_definitions": [{"name": "bad", "input_schema_json": "[1,2]"}]
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(ref m) if m.contains("Tool(bad)")));
    }
}
