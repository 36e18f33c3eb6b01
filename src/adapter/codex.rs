use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::Value;

use super::openai_compatible::ChatCompletions;
use super::{log_outbound, GenerationRequest, WireAdapter};
use crate::config::Provider;
use crate::error::GatewayError;
use crate::protocol::canonical::{ProviderKind, ToolCompletion};
use crate::protocol::codex::encode_responses_request;
use crate::protocol::codex::response_decoder::decode_text;
use crate::protocol::codex::stream::CodexStreamDecoder;
use crate::stream::{decode_stream, EventStream};
use crate::transport::{join_url, CallContext, HttpTransport};
use crate::translate::to_text_prompt;

const LABEL: &str = "Codex";

/// Codex-style `/responses` for text, `/chat/completions` once tools are involved.
pub struct CodexAdapter {
    transport: Arc<HttpTransport>,
    chat: ChatCompletions,
}

impl CodexAdapter {
    #[must_use]
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self {
            chat: ChatCompletions::new(transport.clone()),
            transport,
        }
    }

    fn prepare(
        provider: &Provider,
        request: &GenerationRequest<'_>,
        stream: bool,
    ) -> Result<(String, HeaderMap, Value), GatewayError> {
        let url = join_url(provider.require_base_url()?, "responses");
        let headers = ChatCompletions::headers(provider)?;
        let instructions = Some(request.turn.system).filter(|s| !s.trim().is_empty());
        let body = encode_responses_request(
            request.model,
            instructions,
            &to_text_prompt(&request.turn),
            stream,
            &provider.extra_body,
        )?;
        log_outbound(provider, request.model, &url, stream);
        Ok((url, headers, body))
    }
}

#[async_trait]
impl WireAdapter for CodexAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiNative
    }

    async fn complete_text(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<String, GatewayError> {
        if !request.tools.is_empty() {
            return self.chat.complete_text(ctx, provider, request).await;
        }
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
        if request.tools.is_empty() {
            let text = self.complete_text(ctx, provider, request).await?;
            return Ok(ToolCompletion::Final { text });
        }
        self.chat.complete_with_tools(ctx, provider, request).await
    }

    async fn stream_events(
        &self,
        ctx: &CallContext,
        provider: &Provider,
        request: &GenerationRequest<'_>,
    ) -> Result<EventStream, GatewayError> {
        if !request.tools.is_empty() {
            return self.chat.stream_events(ctx, provider, request).await;
        }
        let (url, headers, body) = Self::prepare(provider, request, true)?;
        let bytes = self.transport.post_stream(ctx, &url, &headers, &body).await?;
        Ok(decode_stream(ctx.clone(), bytes, CodexStreamDecoder::new()))
    }

    async fn list_models(&self, ctx: &CallContext, provider: &Provider) -> Result<Vec<String>, GatewayError> {
        self.chat.list_models(ctx, provider).await
    }
}
