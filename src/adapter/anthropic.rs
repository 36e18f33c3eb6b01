use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName};
use serde_json::Value;

use super::{log_outbound, parse_model_list, provider_headers, GenerationRequest, WireAdapter};
use crate::config::Provider;
use crate::error::GatewayError;
use crate::protocol::anthropic::encoder::encode_messages_request;
use crate::protocol::anthropic::response_decoder::{decode_text, decode_tool_completion};
use crate::protocol::anthropic::stream::AnthropicStreamDecoder;
use crate::protocol::anthropic::ANTHROPIC_VERSION;
use crate::protocol::canonical::{ProviderKind, ToolCompletion};
use crate::stream::{decode_stream, EventStream};
use crate::transport::{join_url, CallContext, HttpTransport};
use crate::translate::to_anthropic_messages;

const LABEL: &str = "Anthropic";

fn headers(provider: &Provider) -> Result<HeaderMap, GatewayError> {
    let secret = provider.require_secret()?;
    provider_headers(
        provider,
        &[
            (HeaderName::from_static("x-api-key"), secret.to_string()),
            (HeaderName::from_static("anthropic-version"), ANTHROPIC_VERSION.to_string()),
        ],
    )
}

/// Anthropic Messages API.
pub struct AnthropicAdapter {
    transport: Arc<HttpTransport>,
}

impl AnthropicAdapter {
    #[must_use]
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }

    fn prepare(
        provider: &Provider,
        request: &GenerationRequest<'_>,
        stream: bool,
    ) -> Result<(String, HeaderMap, Value), GatewayError> {
        let url = join_url(provider.require_base_url()?, "v1/messages");
        let headers = headers(provider)?;
        let body = encode_messages_request(
            request.model,
            Some(request.turn.system),
            to_anthropic_messages(&request.turn)?,
            request.tools,
            request.params,
            stream,
            &provider.extra_body,
        )?;
        log_outbound(provider, request.model, &url, stream);
        Ok((url, headers, body))
    }
}

#[async_trait]
impl WireAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AnthropicNative
    }

    async fn complete_text(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<String, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, false)?;
        let response = self.transport.post_json(ctx, LABEL, &url, &headers, &body).await?;
        decode_text(&response)
    }

    async fn complete_with_tools(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<ToolCompletion, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, false)?;
        let response = self.transport.post_json(ctx, LABEL, &url, &headers, &body).await?;
        decode_tool_completion(&response)
    }

    async fn stream_events(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<EventStream, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, true)?;
        let bytes = self.transport.post_stream(ctx, &url, &headers, &body).await?;
        Ok(decode_stream(ctx.clone(), bytes, AnthropicStreamDecoder::new()))
    }

    async fn list_models(&self, ctx: &CallContext, provider: &Provider) -> Result<Vec<String>, GatewayError> {
        let url = join_url(provider.require_base_url()?, "v1/models");
        let headers = headers(provider)?;
        tracing::debug!(provider = %provider.id, url = %url, "listing provider models");
        let response = self.transport.get_json(ctx, LABEL, &url, &headers).await?;
        parse_model_list(LABEL, &response)
    }
}
