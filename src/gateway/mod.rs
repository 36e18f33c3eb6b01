//! `complete` and `stream`: the two entry points hosts call.
//!
//! Each call re-reads configuration, checks the endpoint's routing rule,
//! resolves a target, and drives exactly one adapter call. The neutral result
//! is passed through the caller's `transform` before it is returned.

pub mod endpoints;
pub mod envelope;
pub mod next_edit;
pub mod prompt;
pub mod tool_turn;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{adapter_for, GenerationRequest, WireAdapter};
use crate::config::{ConfigSource, ResolvedConfig};
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationParams, NormalizedEvent, ToolCompletion, ToolDefinition};
use crate::protocol::nodes::{
    parse_chat_history, parse_request_nodes, ChatExchange, OutputNode, StructuredNode,
    STOP_REASON_TOOL_USE_REQUESTED,
};
use crate::registry::upstream::resolve_snapshot;
use crate::registry::{build_registry, get_models_response, ModelListCache, UpstreamSnapshotCache};
use crate::routing::{ensure_enabled, resolve_target, Invocation, ResolvedTarget};
use crate::stream::EventStream;
use crate::transport::{CallContext, HttpTransport};
use crate::translate::{parse_tool_definitions, ChatTurn};
use crate::util::{any_field, unix_now_ms};

pub use endpoints::Endpoint;
pub use envelope::ChunkStream;
pub use tool_turn::{tool_turn_stream, ToolTurnEmitter};

/// Whether the gateway took the call.
#[derive(Debug)]
pub enum GatewayOutcome<T> {
    Handled(T),
    /// The feature or endpoint is switched off; the host should fall back to
    /// its own handling. Not an error.
    NotHandled,
}

impl<T> GatewayOutcome<T> {
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, GatewayOutcome::Handled(_))
    }

    #[must_use]
    pub fn handled(self) -> Option<T> {
        match self {
            GatewayOutcome::Handled(value) => Some(value),
            GatewayOutcome::NotHandled => None,
        }
    }
}

/// Per-call knobs supplied by the host.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides `timeouts.request_ms`.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    /// Platform base URL for the `get-models` snapshot when config has none.
    pub upstream_base_url: Option<String>,
    pub upstream_token: Option<String>,
}

impl CallOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_upstream(mut self, base_url: &str, token: &str) -> Self {
        self.upstream_base_url = Some(base_url.to_string());
        self.upstream_token = Some(token.to_string());
        self
    }
}

/// Everything one generation call needs, owned so streams can outlive the
/// request body.
#[derive(Debug, Clone)]
struct PreparedCall {
    target: ResolvedTarget,
    system: String,
    message: String,
    context: String,
    history: Vec<ChatExchange>,
    nodes: Vec<StructuredNode>,
    tools: Vec<ToolDefinition>,
    params: GenerationParams,
}

impl PreparedCall {
    fn new(config: &ResolvedConfig, endpoint: Endpoint, body: &Value) -> Result<Self, GatewayError> {
        let target = resolve_target(config, endpoint.as_str(), prompt::requested_model(body))?;
        let system = prompt::build_system_text(body);
        let params = GenerationParams::from_body(body);
        if !endpoint.is_chat() {
            return Ok(Self {
                target,
                system,
                message: prompt::build_user_text(body),
                context: String::new(),
                history: Vec::new(),
                nodes: Vec::new(),
                tools: Vec::new(),
                params,
            });
        }
        Ok(Self {
            target,
            system,
            message: prompt::chat_message(body).to_string(),
            context: prompt::chat_context(body),
            history: parse_chat_history(any_field(body, &["chat_history", "chatHistory"])),
            nodes: parse_request_nodes(body.get("nodes")),
            tools: parse_tool_definitions(body)?,
            params,
        })
    }

    fn turn(&self) -> ChatTurn<'_> {
        ChatTurn {
            system: &self.system,
            history: &self.history,
            message: &self.message,
            nodes: &self.nodes,
            context: &self.context,
        }
    }

    fn request(&self) -> GenerationRequest<'_> {
        GenerationRequest {
            model: &self.target.model,
            turn: self.turn(),
            tools: &self.tools,
            params: &self.params,
        }
    }
}

/// The gateway: configuration source, shared transport and caches.
pub struct Gateway {
    config: Arc<dyn ConfigSource>,
    transport: Arc<HttpTransport>,
    models_cache: Arc<dyn ModelListCache>,
    snapshots: UpstreamSnapshotCache,
}

impl Gateway {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigSource>, models_cache: Arc<dyn ModelListCache>) -> Self {
        Self {
            config,
            transport: Arc::new(HttpTransport::new()),
            models_cache,
            snapshots: UpstreamSnapshotCache::default(),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn models_cache(&self) -> &Arc<dyn ModelListCache> {
        &self.models_cache
    }

    /// Common preamble: fresh config, endpoint gate, call context.
    fn begin(
        &self,
        raw_endpoint: &str,
        options: &CallOptions,
    ) -> Result<Option<(Arc<ResolvedConfig>, Endpoint, CallContext)>, GatewayError> {
        let config = self.config.resolve()?;
        if !config.enabled {
            tracing::debug!(endpoint = raw_endpoint, "gateway disabled, call not handled");
            return Ok(None);
        }
        let endpoint = Endpoint::parse(raw_endpoint)?;
        let invocation = if endpoint == Endpoint::GetModels {
            Invocation::AutoDetected
        } else {
            Invocation::Explicit
        };
        if !ensure_enabled(&config, endpoint.as_str(), invocation)? {
            tracing::debug!(%endpoint, "endpoint disabled by routing rule, call not handled");
            return Ok(None);
        }
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_millis(config.timeouts.request_ms));
        let ctx = CallContext::new(timeout, options.cancel.clone());
        ctx.check()?;
        Ok(Some((config, endpoint, ctx)))
    }

    fn adapter(&self, call: &PreparedCall) -> Result<Box<dyn WireAdapter>, GatewayError> {
        Ok(adapter_for(call.target.provider.kind()?, Arc::clone(&self.transport)))
    }

    /// Run a non-streaming endpoint.
    ///
    /// # Errors
    ///
    /// Configuration, routing, transport and protocol failures, a disabled
    /// explicitly-invoked endpoint, an endpoint outside the catalogue, or a
    /// stream endpoint.
    pub async fn complete<T, F>(
        &self,
        endpoint: &str,
        body: &Value,
        transform: F,
        options: &CallOptions,
    ) -> Result<GatewayOutcome<T>, GatewayError>
    where
        F: FnOnce(Value) -> T,
    {
        let Some((config, endpoint, ctx)) = self.begin(endpoint, options)? else {
            return Ok(GatewayOutcome::NotHandled);
        };
        let result = match endpoint {
            Endpoint::GetModels => self.get_models(&config, &ctx, options).await?,
            Endpoint::NextEditLoc => self.next_edit_loc(&config, &ctx, body).await?,
            Endpoint::Chat => self.chat(&config, &ctx, body).await?,
            Endpoint::Completion | Endpoint::ChatInputCompletion | Endpoint::Edit => {
                let call = PreparedCall::new(&config, endpoint, body)?;
                ctx.check()?;
                let text = self
                    .adapter(&call)?
                    .complete_text(&ctx, &call.target.provider, &call.request())
                    .await?;
                if endpoint == Endpoint::Edit {
                    envelope::edit_envelope(&text)
                } else {
                    envelope::completion_envelope(&text)
                }
            }
            stream_only => return Err(GatewayError::UnimplementedEndpoint(stream_only.to_string())),
        };
        ctx.check()?;
        Ok(GatewayOutcome::Handled(transform(result)))
    }

    /// Run a streaming endpoint. The upstream request is sent before this
    /// returns, so status errors surface here rather than mid-stream.
    ///
    /// # Errors
    ///
    /// As [`Gateway::complete`], with non-stream endpoints rejected instead.
    pub async fn stream<T, F>(
        &self,
        endpoint: &str,
        body: &Value,
        transform: F,
        options: &CallOptions,
    ) -> Result<GatewayOutcome<ChunkStream<T>>, GatewayError>
    where
        F: Fn(Value) -> T + Send + 'static,
        T: Send + 'static,
    {
        let Some((config, endpoint, ctx)) = self.begin(endpoint, options)? else {
            return Ok(GatewayOutcome::NotHandled);
        };
        if !endpoint.is_stream() {
            return Err(GatewayError::UnimplementedEndpoint(endpoint.to_string()));
        }
        let call = PreparedCall::new(&config, endpoint, body)?;
        let adapter = self.adapter(&call)?;
        ctx.check()?;

        let chunks: ChunkStream<Value> = match endpoint {
            Endpoint::NextEditStream => {
                let suggested = adapter
                    .complete_text(&ctx, &call.target.provider, &call.request())
                    .await?;
                let value = envelope::next_edit_suggestion(body, &suggested, unix_now_ms());
                Box::pin(futures_util::stream::once(async move { Ok::<_, GatewayError>(value) }))
            }
            Endpoint::ChatStream if !call.tools.is_empty() => {
                tracing::debug!(tools = call.tools.len(), "starting chat tool turn");
                let events = adapter
                    .stream_events(&ctx, &call.target.provider, &call.request())
                    .await?;
                tool_turn_stream(ctx, events)
            }
            _ => {
                let events = adapter
                    .stream_events(&ctx, &call.target.provider, &call.request())
                    .await?;
                text_chunks(ctx, events, endpoint.emits_bare_text())
            }
        };
        Ok(GatewayOutcome::Handled(Box::pin(
            chunks.map(move |chunk| chunk.map(&transform)),
        )))
    }

    /// Fetch a provider's model list and store it in the model-list cache.
    ///
    /// # Errors
    ///
    /// Unknown provider, missing credentials, or a failed listing call.
    pub async fn refresh_provider_models(
        &self,
        provider_id: &str,
        options: &CallOptions,
    ) -> Result<Vec<String>, GatewayError> {
        let config = self.config.resolve()?;
        let provider = config
            .provider(provider_id.trim())
            .ok_or_else(|| GatewayError::Config(format!("Provider({}) is not configured", provider_id.trim())))?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_millis(config.timeouts.models_ms));
        let ctx = CallContext::new(timeout, options.cancel.clone());
        ctx.check()?;
        let adapter = adapter_for(provider.kind()?, Arc::clone(&self.transport));
        let models = adapter.list_models(&ctx, provider).await?;
        self.models_cache.put(&provider.id, &provider.base_url, models.clone());
        tracing::info!(provider = %provider.id, count = models.len(), "refreshed provider model list");
        Ok(models)
    }

    async fn get_models(
        &self,
        config: &ResolvedConfig,
        ctx: &CallContext,
        options: &CallOptions,
    ) -> Result<Value, GatewayError> {
        let registry = build_registry(config, self.models_cache.as_ref())?;
        let pick = |configured: &str, supplied: Option<&String>| {
            Some(configured.trim())
                .filter(|s| !s.is_empty())
                .or_else(|| supplied.map(|s| s.trim()))
                .unwrap_or_default()
                .to_string()
        };
        let base_url = pick(&config.proxy.base_url, options.upstream_base_url.as_ref());
        let token = pick(&config.proxy.token, options.upstream_token.as_ref());
        let models_ctx = ctx.narrowed(Duration::from_millis(config.timeouts.models_ms));
        let snapshot = resolve_snapshot(&self.transport, &self.snapshots, &models_ctx, &base_url, &token).await?;
        get_models_response(snapshot, &registry, config.proxy.feature_flags_mode)
    }

    async fn next_edit_loc(
        &self,
        config: &ResolvedConfig,
        ctx: &CallContext,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let max = next_edit::num_results(body);
        let mut call = PreparedCall::new(config, Endpoint::NextEditLoc, body)?;
        call.system = next_edit::system_prompt(&call.system, max);
        call.message = next_edit::user_prompt(&call.message, body, max);
        ctx.check()?;
        let text = self
            .adapter(&call)?
            .complete_text(ctx, &call.target.provider, &call.request())
            .await?;
        let fallback_path = crate::util::str_field(body, &["path"]).unwrap_or_default();
        next_edit::parse_locations(&text, fallback_path, max)
    }

    async fn chat(&self, config: &ResolvedConfig, ctx: &CallContext, body: &Value) -> Result<Value, GatewayError> {
        let call = PreparedCall::new(config, Endpoint::Chat, body)?;
        let adapter = self.adapter(&call)?;
        ctx.check()?;
        if call.tools.is_empty() {
            let text = adapter
                .complete_text(ctx, &call.target.provider, &call.request())
                .await?;
            return Ok(envelope::chat_envelope(&text, Vec::new(), None));
        }
        match adapter
            .complete_with_tools(ctx, &call.target.provider, &call.request())
            .await?
        {
            ToolCompletion::Final { text } => Ok(envelope::chat_envelope(&text, Vec::new(), None)),
            ToolCompletion::ToolCalls {
                tool_uses,
                assistant_text,
            } => {
                let nodes = (1u32..)
                    .zip(&tool_uses)
                    .map(|(id, tool)| OutputNode::tool_use(id, tool))
                    .collect();
                Ok(envelope::chat_envelope(
                    &assistant_text,
                    nodes,
                    Some(STOP_REASON_TOOL_USE_REQUESTED),
                ))
            }
        }
    }
}

/// Text deltas as envelopes. Other events have no place in a text stream.
fn text_chunks(ctx: CallContext, events: EventStream, bare: bool) -> ChunkStream<Value> {
    Box::pin(async_stream::try_stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            match event? {
                NormalizedEvent::Text { delta } if !delta.is_empty() => {
                    ctx.check()?;
                    yield if bare {
                        envelope::bare_text(&delta)
                    } else {
                        envelope::chat_envelope(&delta, Vec::new(), None)
                    };
                }
                other => tracing::trace!(?other, "skipping non-text event in text stream"),
            }
        }
    })
}
