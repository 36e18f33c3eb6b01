use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::Value;

use super::{bearer, log_outbound, parse_model_list, provider_headers, GenerationRequest, WireAdapter};
use crate::config::Provider;
use crate::error::GatewayError;
use crate::protocol::canonical::{ProviderKind, ToolCompletion};
use crate::protocol::openai_chat::encoder::encode_chat_request;
use crate::protocol::openai_chat::response_decoder::{decode_text, decode_tool_completion};
use crate::stream::{decode_stream, ChatCompletionsNormalizer, EventStream};
use crate::transport::{join_url, CallContext, HttpTransport};
use crate::translate::to_openai_messages;

const LABEL: &str = "OpenAI";

/// `/chat/completions` speaker shared by the OpenAI-compatible family and the
/// Codex family's tool path.
pub(crate) struct ChatCompletions {
    transport: Arc<HttpTransport>,
}

impl ChatCompletions {
    pub(crate) fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }

    pub(crate) fn headers(provider: &Provider) -> Result<HeaderMap, GatewayError> {
        let secret = provider.require_secret()?;
        provider_headers(provider, &[(http::header::AUTHORIZATION, bearer(secret))])
    }

    fn prepare(
        provider: &Provider,
        request: &GenerationRequest<'_>,
        stream: bool,
    ) -> Result<(String, HeaderMap, Value), GatewayError> {
        let url = join_url(provider.require_base_url()?, "chat/completions");
        let headers = Self::headers(provider)?;
        let body = encode_chat_request(
            request.model,
            to_openai_messages(&request.turn),
            request.tools,
            request.params,
            stream,
            &provider.extra_body,
        )?;
        log_outbound(provider, request.model, &url, stream);
        Ok((url, headers, body))
    }

    pub(crate) async fn complete_text(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<String, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, false)?;
        let response = self.transport.post_json(ctx, LABEL, &url, &headers, &body).await?;
        decode_text(LABEL, &response)
    }

    pub(crate) async fn complete_with_tools(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<ToolCompletion, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, false)?;
        let response = self.transport.post_json(ctx, LABEL, &url, &headers, &body).await?;
        decode_tool_completion(LABEL, &response)
    }

    pub(crate) async fn stream_events(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<EventStream, GatewayError> {
        let (url, headers, body) = Self::prepare(provider, request, true)?;
        let bytes = self.transport.post_stream(ctx, &url, &headers, &body).await?;
        Ok(decode_stream(ctx.clone(), bytes, ChatCompletionsNormalizer::new()))
    }

    pub(crate) async fn list_models(&self, ctx: &CallContext, provider: &Provider) -> Result<Vec<String>, GatewayError> {
        let url = join_url(provider.require_base_url()?, "models");
        let headers = Self::headers(provider)?;
        tracing::debug!(provider = %provider.id, url = %url, "listing provider models");
        let response = self.transport.get_json(ctx, LABEL, &url, &headers).await?;
        parse_model_list(LABEL, &response)
    }
}

/// Any backend speaking OpenAI Chat Completions with bearer auth.
pub struct OpenAiCompatibleAdapter {
    chat: ChatCompletions,
}

impl OpenAiCompatibleAdapter {
    #[must_use]
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self {
            chat: ChatCompletions::new(transport),
        }
    }
}

#[async_trait]
impl WireAdapter for OpenAiCompatibleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompatible
    }

    async fn complete_text(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<String, GatewayError> {
        self.chat.complete_text(ctx, provider, request).await
    }

    async fn complete_with_tools(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<ToolCompletion, GatewayError> {
        self.chat.complete_with_tools(ctx, provider, request).await
    }

    async fn stream_events(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<EventStream, GatewayError> {
        self.chat.stream_events(ctx, provider, request).await
    }

    async fn list_models(&self, ctx: &CallContext, provider: &Provider) -> Result<Vec<String>, GatewayError> {
        self.chat.list_models(ctx, provider).await
    }
}
