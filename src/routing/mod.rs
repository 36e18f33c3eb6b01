//! Picks the provider and model for one call.
//!
//! Resolution is a pure function of the endpoint, the requested model and a
//! configuration snapshot; it never touches the network.

pub mod model_id;

use crate::config::{Provider, ResolvedConfig};
use crate::error::GatewayError;

pub use model_id::EncodedModelId;

/// Endpoints whose model comes from the client's model picker.
pub const PRIMARY_CHAT_ENDPOINTS: [&str; 2] = ["chat", "chat-stream"];

/// Sole input to an adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub provider: Provider,
    pub model: String,
}

/// How an endpoint was reached, which decides what a disabled rule means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The caller asked for this endpoint; a disabled rule is an error.
    Explicit,
    /// Reached through feature detection; a disabled rule means "not handled".
    AutoDetected,
}

#[must_use]
pub fn is_primary_chat(endpoint: &str) -> bool {
    PRIMARY_CHAT_ENDPOINTS.contains(&endpoint)
}

/// `Ok(true)` when the endpoint may run, `Ok(false)` when it is disabled and
/// the caller tolerates silent fallback.
///
/// # Errors
///
/// Returns [`GatewayError::EndpointDisabled`] for an explicitly invoked
/// endpoint whose rule has `enabled: false`.
pub fn ensure_enabled(config: &ResolvedConfig, endpoint: &str, invocation: Invocation) -> Result<bool, GatewayError> {
    let disabled = config.rule(endpoint).is_some_and(|rule| rule.is_disabled());
    match (disabled, invocation) {
        (false, _) => Ok(true),
        (true, Invocation::AutoDetected) => Ok(false),
        (true, Invocation::Explicit) => Err(GatewayError::EndpointDisabled(endpoint.to_string())),
    }
}

fn provider_by_id<'a>(config: &'a ResolvedConfig, id: &str) -> Result<&'a Provider, GatewayError> {
    config
        .provider(id.trim())
        .ok_or_else(|| GatewayError::Config(format!("Provider({}) is not configured", id.trim())))
}

fn active_provider(config: &ResolvedConfig) -> Result<&Provider, GatewayError> {
    config
        .active_provider()
        .ok_or_else(|| GatewayError::Config("No providers are configured".to_string()))
}

fn target(provider: &Provider, model: &str) -> ResolvedTarget {
    ResolvedTarget {
        provider: provider.clone(),
        model: model.trim().to_string(),
    }
}

fn with_default_model(provider: &Provider, reason: &str) -> Result<ResolvedTarget, GatewayError> {
    let model = provider.default_model().ok_or_else(|| {
        GatewayError::Config(format!("Provider({}) is missing default_model ({reason})", provider.id))
    })?;
    Ok(target(provider, model))
}

/// Resolve `{provider, model}` for an endpoint.
///
/// Primary chat endpoints honour a `byok:` encoded requested model, else use
/// the active provider's default model. Other endpoints follow their routing
/// rule: an encoded `rule.model` wins outright, then `rule.provider_id` (or
/// the active provider) with `rule.model` (or that provider's default).
///
/// # Errors
///
/// Returns [`GatewayError::Config`] for a malformed encoded id, an unknown
/// provider, no providers at all, or a missing default model.
pub fn resolve_target(
    config: &ResolvedConfig,
    endpoint: &str,
    requested_model: Option<&str>,
) -> Result<ResolvedTarget, GatewayError> {
    let resolved = if is_primary_chat(endpoint) {
        resolve_chat(config, requested_model)?
    } else {
        resolve_by_rule(config, endpoint)?
    };
    tracing::debug!(
        endpoint,
        provider = %resolved.provider.id,
        model = %resolved.model,
        "resolved routing target"
    );
    Ok(resolved)
}

fn resolve_chat(config: &ResolvedConfig, requested_model: Option<&str>) -> Result<ResolvedTarget, GatewayError> {
    let requested = requested_model.map(str::trim).filter(|m| !m.is_empty());
    if let Some(encoded) = requested.map(EncodedModelId::parse).transpose()?.flatten() {
        let provider = provider_by_id(config, &encoded.provider_id)?;
        return Ok(target(provider, &encoded.model_id));
    }
    with_default_model(active_provider(config)?, "no byok model was selected")
}

fn resolve_by_rule(config: &ResolvedConfig, endpoint: &str) -> Result<ResolvedTarget, GatewayError> {
    let rule = config.rule(endpoint);
    let rule_model = rule
        .and_then(|r| r.model.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty());

    if let Some(encoded) = rule_model.map(EncodedModelId::parse).transpose()?.flatten() {
        let provider = provider_by_id(config, &encoded.provider_id)?;
        return Ok(target(provider, &encoded.model_id));
    }

    let provider = match rule
        .and_then(|r| r.provider_id.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        Some(id) => provider_by_id(config, id)?,
        None => active_provider(config)?,
    };
    match rule_model {
        Some(model) => Ok(target(provider, model)),
        None => with_default_model(provider, &format!("routing rule for {endpoint} sets no model")),
    }
}
