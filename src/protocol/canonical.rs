use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// The wire family a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `/chat/completions` with bearer auth.
    OpenAiCompatible,
    /// Codex-style `/responses`, falling back to `/chat/completions` for tools.
    OpenAiNative,
    /// `/v1/messages` with `x-api-key`.
    AnthropicNative,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAiCompatible,
        ProviderKind::OpenAiNative,
        ProviderKind::AnthropicNative,
    ];

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "openai_compatible" => Some(ProviderKind::OpenAiCompatible),
            "openai_native" => Some(ProviderKind::OpenAiNative),
            "anthropic_native" => Some(ProviderKind::AnthropicNative),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::OpenAiNative => "openai_native",
            ProviderKind::AnthropicNative => "anthropic_native",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counters, each optional because backends report different subsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
}

impl TokenUsage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.cache_read_input_tokens.is_none()
            && self.cache_creation_input_tokens.is_none()
    }
}

/// A model-issued tool call. `input_json` is the raw JSON argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

impl ToolUse {
    /// Parse `input_json` as a JSON object; blank input is `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] naming the tool when the input is
    /// not a JSON object.
    pub fn input_object(&self) -> Result<serde_json::Map<String, Value>, GatewayError> {
        let raw = self.input_json.trim();
        if raw.is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(GatewayError::protocol_with_preview(
                format_args!("Tool({}) input_json is not a JSON object", self.name),
                raw,
            )),
        }
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// One ordered part of a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResultPart {
    Text(String),
    Image { format: i64, data: String },
}

/// The host-executed result of a tool call, fed back on the next turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub text: String,
    pub parts: Vec<ToolResultPart>,
    pub is_error: bool,
}

/// Backend-agnostic streaming output unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Text { delta: String },
    Thinking { summary: String },
    ToolUse(ToolUse),
    TokenUsage(TokenUsage),
}

/// Result of a single non-streaming call made with tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCompletion {
    Final { text: String },
    ToolCalls { tool_uses: Vec<ToolUse>, assistant_text: String },
}

/// Generation parameters read from the request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
    pub thinking_budget: Option<u64>,
}

impl GenerationParams {
    /// Read the recognised parameters from a loose request body.
    #[must_use]
    pub fn from_body(body: &Value) -> Self {
        let float = |key: &str| body.get(key).and_then(crate::util::loose_f64);
        let count = |key: &str| {
            float(key).and_then(|n| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                (n >= 1.0).then(|| n.trunc() as u64)
            })
        };
        Self {
            temperature: float("temperature"),
            max_tokens: count("max_tokens"),
            top_p: float("top_p"),
            top_k: count("top_k"),
            presence_penalty: float("presence_penalty"),
            frequency_penalty: float("frequency_penalty"),
            stop: normalize_stop(body.get("stop")),
            seed: body.get("seed").and_then(crate::util::loose_i64),
            thinking_budget: count("thinking_budget"),
        }
    }
}

/// Blank stop strings are dropped; a single string becomes a one-item list.
#[must_use]
pub fn normalize_stop(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
