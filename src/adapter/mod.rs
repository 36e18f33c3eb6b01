//! Per-family wire adapters.
//!
//! Every adapter takes a resolved provider plus a neutral
//! [`GenerationRequest`] and performs exactly one upstream call.

mod anthropic;
mod codex;
mod openai_compatible;

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::config::Provider;
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationParams, ProviderKind, ToolCompletion, ToolDefinition};
use crate::stream::EventStream;
use crate::transport::{CallContext, HttpTransport};
use crate::translate::ChatTurn;

pub use anthropic::AnthropicAdapter;
pub use codex::CodexAdapter;
pub use openai_compatible::OpenAiCompatibleAdapter;

/// Neutral input to one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub model: &'a str,
    pub turn: ChatTurn<'a>,
    pub tools: &'a [ToolDefinition],
    pub params: &'a GenerationParams,
}

#[async_trait]
pub trait WireAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// One non-streaming call returning the model's text.
    async fn complete_text(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<String, GatewayError>;

    /// One non-streaming call that may end in tool calls.
    async fn complete_with_tools(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<ToolCompletion, GatewayError>;

    /// One streaming call. The returned stream owns everything it needs.
    async fn stream_events(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<EventStream, GatewayError>;

    /// Sorted model ids the provider advertises.
    async fn list_models(&self, ctx: &CallContext, provider: &Provider) -> Result<Vec<String>, GatewayError>;
}

/// Adapter for a provider family, sharing one transport.
#[must_use]
pub fn adapter_for(kind: ProviderKind, transport: Arc<HttpTransport>) -> Box<dyn WireAdapter> {
    match kind {
        ProviderKind::OpenAiCompatible => Box::new(OpenAiCompatibleAdapter::new(transport)),
        ProviderKind::OpenAiNative => Box::new(CodexAdapter::new(transport)),
        ProviderKind::AnthropicNative => Box::new(AnthropicAdapter::new(transport)),
    }
}

/// Provider headers first, then the auth headers so auth always wins.
pub(crate) fn provider_headers(
    provider: &Provider,
    auth: &[(HeaderName, String)],
) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::with_capacity(provider.extra_headers.len() + auth.len() + 1);
    headers.insert(http::header::ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
    for (name, value) in &provider.extra_headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
            GatewayError::Config(format!("Provider({}) has invalid header name '{name}'", provider.id))
        })?;
        let value = HeaderValue::from_str(value.trim()).map_err(|_| {
            GatewayError::Config(format!("Provider({}) has invalid value for header '{name}'", provider.id))
        })?;
        headers.insert(name, value);
    }
    for (name, value) in auth {
        let value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::Config(format!("Provider({}) credential is not a valid header value", provider.id))
        })?;
        headers.insert(name.clone(), value);
    }
    Ok(headers)
}

/// `Bearer <secret>`, tolerating a secret that already carries the scheme.
pub(crate) fn bearer(secret: &str) -> String {
    let secret = secret.trim();
    match secret.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => format!("Bearer {}", secret[7..].trim()),
        _ => format!("Bearer {secret}"),
    }
}

/// Model ids from `data[].id`, else `models[].id|name`, sorted and de-duplicated.
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] when neither list is present.
pub(crate) fn parse_model_list(label: &str, response: &Value) -> Result<Vec<String>, GatewayError> {
    let (items, keys): (&Vec<Value>, &[&str]) = if let Some(data) = response.get("data").and_then(Value::as_array) {
        (data, &["id"])
    } else if let Some(models) = response.get("models").and_then(Value::as_array) {
        (models, &["id", "name"])
    } else {
        return Err(GatewayError::protocol_with_preview(
            format_args!("{label} models response is missing data[]"),
            &response.to_string(),
        ));
    };
    let mut ids: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(id) => Some(id.trim()),
            other => crate::util::str_field(other, keys),
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

fn log_outbound(provider: &Provider, model: &str, url: &str, stream: bool) {
    tracing::debug!(
        provider = %provider.id,
        model,
        url,
        stream,
        "calling upstream provider"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_headers_win_over_provider_headers() {
        let mut provider = Provider::new("oa", ProviderKind::OpenAiCompatible, "https://a.example");
        provider.extra_headers.insert("Authorization".into(), "Bearer wrong".into());
        provider.extra_headers.insert("x-org".into(), "acme".into());
        let headers = provider_headers(&provider, &[(http::header::AUTHORIZATION, bearer("sk-1"))]).unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-1");
        assert_eq!(headers["x-org"], "acme");
    }

    #[test]
    fn test_invalid_header_names_provider() {
        let mut provider = Provider::new("oa", ProviderKind::OpenAiCompatible, "https://a.example");
        provider.extra_headers.insert("bad header".into(), "v".into());
        let err = provider_headers(&provider, &[]).unwrap_err();
        assert!(err.to_string().contains("Provider(oa)"));
    }

    #[test]
    fn test_bearer_does_not_double_prefix() {
        assert_eq!(bearer("sk-1"), "Bearer sk-1");
        assert_eq!(bearer("bearer sk-1"), "Bearer sk-1");
    }

    #[test]
    fn test_parse_model_list_shapes() {
        let data = json!({"data": [{"id": "b"}, {"id": "a"}, {"id": "b"}, {"object": "model"}]});
        assert_eq!(parse_model_list("OpenAI", &data).unwrap(), vec!["a", "b"]);

        let models = json!({"models": [{"name": "m2"}, {"id": "m1"}, "m3"]});
        assert_eq!(parse_model_list("OpenAI", &models).unwrap(), vec!["m1", "m2", "m3"]);

        let err = parse_model_list("Anthropic", &json!({"error": "x"})).unwrap_err();
        assert!(err.to_string().contains("Anthropic models response is missing data[]"));
    }
}
