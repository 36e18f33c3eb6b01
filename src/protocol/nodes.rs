//! Vendor-neutral structured nodes as they arrive from the client, and the
//! response nodes the gateway emits back.
//!
//! Incoming nodes are loose JSON objects with a numeric `type` and one
//! payload object. Parsing is forgiving: unknown types and malformed payloads
//! are dropped rather than failing the request.

use serde::Serialize;
use serde_json::Value;

use super::canonical::{TokenUsage, ToolResult, ToolResultPart, ToolUse};
use crate::util::{any_field, loose_bool, loose_i64, str_field};

pub const REQUEST_NODE_TEXT: i64 = 0;
pub const REQUEST_NODE_TOOL_RESULT: i64 = 1;
pub const REQUEST_NODE_IMAGE: i64 = 2;
pub const REQUEST_NODE_IMAGE_ID: i64 = 3;
pub const REQUEST_NODE_IDE_STATE: i64 = 4;
pub const REQUEST_NODE_EDIT_EVENTS: i64 = 5;
pub const REQUEST_NODE_CHECKPOINT_REF: i64 = 6;
pub const REQUEST_NODE_CHANGE_PERSONALITY: i64 = 7;
pub const REQUEST_NODE_FILE: i64 = 8;
pub const REQUEST_NODE_FILE_ID: i64 = 9;
pub const REQUEST_NODE_HISTORY_SUMMARY: i64 = 10;

pub const RESPONSE_NODE_RAW_RESPONSE: i64 = 0;
pub const RESPONSE_NODE_MAIN_TEXT_FINISHED: i64 = 2;
pub const RESPONSE_NODE_TOOL_USE: i64 = 5;
pub const RESPONSE_NODE_TOOL_USE_START: i64 = 7;
pub const RESPONSE_NODE_THINKING: i64 = 8;
pub const RESPONSE_NODE_TOKEN_USAGE: i64 = 10;

pub const TOOL_RESULT_CONTENT_TEXT: i64 = 1;
pub const TOOL_RESULT_CONTENT_IMAGE: i64 = 2;

pub const STOP_REASON_END_TURN: i64 = 1;
pub const STOP_REASON_TOOL_USE_REQUESTED: i64 = 3;

/// One piece of a chat turn's request content. Order within a turn matters.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredNode {
    Text(String),
    ToolResult(ToolResult),
    Image { format: i64, data: String },
    ImageRef(Value),
    IdeState(Value),
    EditEvents(Value),
    CheckpointRef(Value),
    PersonaChange(Value),
    File(Value),
    FileRef(Value),
    HistorySummary(Value),
}

impl StructuredNode {
    /// Parse one loose request node; `None` for unknown or empty nodes.
    #[must_use]
    pub fn from_value(node: &Value) -> Option<Self> {
        let node_type = node.get("type").and_then(loose_i64)?;
        let payload = |snake: &str, camel: &str| any_field(node, &[snake, camel]).cloned();
        match node_type {
            REQUEST_NODE_TEXT => {
                let text_node = any_field(node, &["text_node", "textNode"])?;
                let content = text_node.get("content").and_then(Value::as_str)?;
                Some(StructuredNode::Text(content.to_string()))
            }
            REQUEST_NODE_TOOL_RESULT => {
                let tool = any_field(node, &["tool_result_node", "toolResultNode"])?;
                parse_tool_result(tool).map(StructuredNode::ToolResult)
            }
            REQUEST_NODE_IMAGE => {
                let image = any_field(node, &["image_node", "imageNode"])?;
                let data = str_field(image, &["image_data", "imageData"])?;
                let format = image.get("format").and_then(loose_i64).unwrap_or(0);
                Some(StructuredNode::Image {
                    format,
                    data: data.to_string(),
                })
            }
            REQUEST_NODE_IMAGE_ID => payload("image_id_node", "imageIdNode").map(StructuredNode::ImageRef),
            REQUEST_NODE_IDE_STATE => payload("ide_state_node", "ideStateNode").map(StructuredNode::IdeState),
            REQUEST_NODE_EDIT_EVENTS => {
                payload("edit_events_node", "editEventsNode").map(StructuredNode::EditEvents)
            }
            REQUEST_NODE_CHECKPOINT_REF => {
                payload("checkpoint_ref_node", "checkpointRefNode").map(StructuredNode::CheckpointRef)
            }
            REQUEST_NODE_CHANGE_PERSONALITY => payload("change_personality_node", "changePersonalityNode")
                .map(StructuredNode::PersonaChange),
            REQUEST_NODE_FILE => payload("file_node", "fileNode").map(StructuredNode::File),
            REQUEST_NODE_FILE_ID => payload("file_id_node", "fileIdNode").map(StructuredNode::FileRef),
            REQUEST_NODE_HISTORY_SUMMARY => payload("history_summary_node", "historySummaryNode")
                .map(StructuredNode::HistorySummary),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            StructuredNode::ToolResult(result) => Some(result),
            _ => None,
        }
    }
}

fn parse_tool_result(tool: &Value) -> Option<ToolResult> {
    let tool_use_id = str_field(tool, &["tool_use_id", "toolUseId"])?.to_string();
    let text = tool
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_error = loose_bool(any_field(tool, &["is_error", "isError"]));
    let parts = any_field(tool, &["content_nodes", "contentNodes"])
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().filter_map(parse_tool_result_part).collect())
        .unwrap_or_default();
    Some(ToolResult {
        tool_use_id,
        text,
        parts,
        is_error,
    })
}

fn parse_tool_result_part(node: &Value) -> Option<ToolResultPart> {
    match node.get("type").and_then(loose_i64)? {
        TOOL_RESULT_CONTENT_TEXT => {
            let text = any_field(node, &["text_content", "textContent"])?.as_str()?;
            Some(ToolResultPart::Text(text.to_string()))
        }
        TOOL_RESULT_CONTENT_IMAGE => {
            let image = any_field(node, &["image_content", "imageContent"])?;
            let data = str_field(image, &["image_data", "imageData"])?;
            Some(ToolResultPart::Image {
                format: image.get("format").and_then(loose_i64).unwrap_or(0),
                data: data.to_string(),
            })
        }
        _ => None,
    }
}

/// The subset of a previous turn's response nodes the translators replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseNode {
    RawResponse(String),
    MainTextFinished(String),
    ToolUseStart(ToolUse),
    ToolUse(ToolUse),
}

impl ResponseNode {
    #[must_use]
    pub fn from_value(node: &Value) -> Option<Self> {
        let node_type = node.get("type").and_then(loose_i64)?;
        match node_type {
            RESPONSE_NODE_RAW_RESPONSE | RESPONSE_NODE_MAIN_TEXT_FINISHED => {
                let content = node.get("content").and_then(Value::as_str)?.to_string();
                Some(if node_type == RESPONSE_NODE_RAW_RESPONSE {
                    ResponseNode::RawResponse(content)
                } else {
                    ResponseNode::MainTextFinished(content)
                })
            }
            RESPONSE_NODE_TOOL_USE | RESPONSE_NODE_TOOL_USE_START => {
                let tool_use = any_field(node, &["tool_use", "toolUse"])?;
                let parsed = ToolUse {
                    id: str_field(tool_use, &["tool_use_id", "toolUseId"])
                        .unwrap_or_default()
                        .to_string(),
                    name: str_field(tool_use, &["tool_name", "toolName"])?.to_string(),
                    input_json: str_field(tool_use, &["input_json", "inputJson"])
                        .unwrap_or("{}")
                        .to_string(),
                };
                Some(if node_type == RESPONSE_NODE_TOOL_USE {
                    ResponseNode::ToolUse(parsed)
                } else {
                    ResponseNode::ToolUseStart(parsed)
                })
            }
            _ => None,
        }
    }
}

/// One history turn, oldest first in a conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatExchange {
    pub request_message: String,
    pub response_text: String,
    pub request_nodes: Vec<StructuredNode>,
    pub response_nodes: Vec<ResponseNode>,
}

impl ChatExchange {
    #[must_use]
    pub fn from_value(exchange: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| exchange.get(*key).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let array = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| exchange.get(*key).and_then(Value::as_array))
        };
        Self {
            request_message: text(&["request_message", "requestMessage", "message"]),
            response_text: text(&["response_text", "responseText", "response", "text"]),
            request_nodes: array(&[
                "structured_request_nodes",
                "structuredRequestNodes",
                "request_nodes",
                "requestNodes",
                "nodes",
            ])
            .map(|nodes| nodes.iter().filter_map(StructuredNode::from_value).collect())
            .unwrap_or_default(),
            response_nodes: array(&[
                "structured_output_nodes",
                "structuredOutputNodes",
                "response_nodes",
                "responseNodes",
            ])
            .map(|nodes| nodes.iter().filter_map(ResponseNode::from_value).collect())
            .unwrap_or_default(),
        }
    }

    /// Tool calls the assistant issued in this turn.
    ///
    /// Complete `TOOL_USE` nodes win over `TOOL_USE_START` nodes; ids are
    /// de-duplicated in first-seen order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        let complete: Vec<&ToolUse> = self
            .response_nodes
            .iter()
            .filter_map(|node| match node {
                ResponseNode::ToolUse(tool) => Some(tool),
                _ => None,
            })
            .collect();
        let chosen = if complete.is_empty() {
            self.response_nodes
                .iter()
                .filter_map(|node| match node {
                    ResponseNode::ToolUseStart(tool) => Some(tool),
                    _ => None,
                })
                .collect()
        } else {
            complete
        };

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(chosen.len());
        for (index, tool) in chosen.into_iter().enumerate() {
            let id = if tool.id.is_empty() {
                format!("tool-{}", index + 1)
            } else {
                tool.id.clone()
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            out.push(ToolUse {
                id,
                name: tool.name.clone(),
                input_json: tool.input_json.clone(),
            });
        }
        out
    }

    /// `response_text`, else the finished text node, else concatenated raw deltas.
    #[must_use]
    pub fn assistant_text(&self) -> String {
        if !self.response_text.is_empty() {
            return self.response_text.clone();
        }
        let mut finished: Option<&str> = None;
        let mut raw = String::new();
        for node in &self.response_nodes {
            match node {
                ResponseNode::MainTextFinished(text) if !text.trim().is_empty() => {
                    finished = Some(text);
                }
                ResponseNode::RawResponse(text) => raw.push_str(text),
                _ => {}
            }
        }
        finished.map_or(raw.trim(), str::trim).to_string()
    }

    #[must_use]
    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.request_nodes
            .iter()
            .filter_map(StructuredNode::as_tool_result)
            .collect()
    }
}

/// Parse an array of loose request nodes, dropping anything unrecognised.
#[must_use]
pub fn parse_request_nodes(value: Option<&Value>) -> Vec<StructuredNode> {
    value
        .and_then(Value::as_array)
        .map(|nodes| nodes.iter().filter_map(StructuredNode::from_value).collect())
        .unwrap_or_default()
}

#[must_use]
pub fn parse_chat_history(value: Option<&Value>) -> Vec<ChatExchange> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(ChatExchange::from_value)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Outgoing response nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolUsePayload {
    pub tool_use_id: String,
    pub tool_name: String,
    pub input_json: String,
}

impl From<&ToolUse> for ToolUsePayload {
    fn from(tool: &ToolUse) -> Self {
        Self {
            tool_use_id: tool.id.clone(),
            tool_name: tool.name.clone(),
            input_json: tool.input_json.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThinkingPayload {
    pub summary: String,
}

/// A node emitted by the gateway inside a chat envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputNode {
    pub id: u32,
    #[serde(rename = "type")]
    pub node_type: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUsePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl OutputNode {
    fn bare(id: u32, node_type: i64, content: String) -> Self {
        Self {
            id,
            node_type,
            content,
            tool_use: None,
            thinking: None,
            token_usage: None,
        }
    }

    #[must_use]
    pub fn raw_response(id: u32, delta: &str) -> Self {
        Self::bare(id, RESPONSE_NODE_RAW_RESPONSE, delta.to_string())
    }

    #[must_use]
    pub fn main_text_finished(id: u32, full_text: &str) -> Self {
        Self::bare(id, RESPONSE_NODE_MAIN_TEXT_FINISHED, full_text.to_string())
    }

    #[must_use]
    pub fn thinking(id: u32, summary: &str) -> Self {
        Self {
            thinking: Some(ThinkingPayload {
                summary: summary.to_string(),
            }),
            ..Self::bare(id, RESPONSE_NODE_THINKING, String::new())
        }
    }

    #[must_use]
    pub fn token_usage(id: u32, usage: TokenUsage) -> Self {
        Self {
            token_usage: Some(usage),
            ..Self::bare(id, RESPONSE_NODE_TOKEN_USAGE, String::new())
        }
    }

    #[must_use]
    pub fn tool_use_start(id: u32, tool: &ToolUse) -> Self {
        Self {
            tool_use: Some(tool.into()),
            ..Self::bare(id, RESPONSE_NODE_TOOL_USE_START, String::new())
        }
    }

    #[must_use]
    pub fn tool_use(id: u32, tool: &ToolUse) -> Self {
        Self {
            tool_use: Some(tool.into()),
            ..Self::bare(id, RESPONSE_NODE_TOOL_USE, String::new())
        }
    }
}
