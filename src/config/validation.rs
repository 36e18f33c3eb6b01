use std::collections::{BTreeMap, HashSet};

use super::{ConfigError, GatewayConfig, RoutingRule, CONFIG_VERSION};
use crate::protocol::canonical::ProviderKind;
use crate::util::normalize_endpoint;

/// Trim identifiers, strip trailing slashes from URLs, and normalize rule keys.
pub fn normalize_config(config: &mut GatewayConfig) {
    config.proxy.base_url = config.proxy.base_url.trim().to_string();
    config.proxy.token = config.proxy.token.trim().to_string();

    for provider in &mut config.providers {
        provider.id = provider.id.trim().to_string();
        provider.provider_type = provider.provider_type.trim().to_string();
        provider.base_url = normalize_base_url(&provider.base_url);
        provider.default_model = non_blank(provider.default_model.take());
        provider.api_key = non_blank(provider.api_key.take());
        provider.token = non_blank(provider.token.take());
        provider.headers = std::mem::take(&mut provider.headers)
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.trim().to_string();
                (!name.is_empty()).then(|| (name, value.trim().to_string()))
            })
            .collect();
    }

    config.routing.active_provider_id = non_blank(config.routing.active_provider_id.take());
    let rules: BTreeMap<String, RoutingRule> = std::mem::take(&mut config.routing.rules)
        .into_iter()
        .filter_map(|(endpoint, rule)| {
            let endpoint = normalize_endpoint(&endpoint);
            if endpoint.is_empty() {
                return None;
            }
            let rule = RoutingRule {
                enabled: rule.enabled,
                provider_id: non_blank(rule.provider_id),
                model: non_blank(rule.model),
            };
            Some((endpoint, rule))
        })
        .collect();
    config.routing.rules = rules;
}

/// Strip surrounding whitespace and trailing slashes from a base URL.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate the full gateway config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(validation_err(format!(
            "unsupported config version {} (expected {CONFIG_VERSION})",
            config.version
        )));
    }
    validate_providers(config)?;
    validate_routing(config)?;
    validate_proxy(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_providers(config: &GatewayConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.id.is_empty() {
            return Err(validation_err("provider id cannot be empty"));
        }
        if !seen.insert(provider.id.as_str()) {
            return Err(validation_err(format!(
                "Provider '{}': duplicate provider id",
                provider.id
            )));
        }
        if ProviderKind::parse(&provider.provider_type).is_none() {
            return Err(validation_err(format!(
                "Provider '{}': unknown provider type '{}'. Must be one of: {}",
                provider.id,
                provider.provider_type,
                ProviderKind::ALL
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        validate_http_url(&format!("Provider '{}'", provider.id), &provider.base_url)?;
    }
    Ok(())
}

fn validate_http_url(owner: &str, url: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(validation_err(format!("{owner}: base_url cannot be empty")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(validation_err(format!(
            "{owner}: base_url must start with http:// or https://"
        )));
    }
    if url::Url::parse(url).is_err() {
        return Err(validation_err(format!(
            "{owner}: base_url '{url}' is not a valid URL"
        )));
    }
    Ok(())
}

fn validate_routing(config: &GatewayConfig) -> Result<(), ConfigError> {
    let Some(active) = config.routing.active_provider_id.as_deref() else {
        return Ok(());
    };
    if config.providers.iter().any(|p| p.id == active) {
        Ok(())
    } else {
        Err(validation_err(format!(
            "routing.active_provider_id '{active}' does not match any provider"
        )))
    }
}

fn validate_proxy(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.proxy.base_url.is_empty() {
        return Ok(());
    }
    validate_http_url("proxy", &config.proxy.base_url)
}

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

fn validate_log_level(config: &GatewayConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if VALID_LOG_LEVELS.contains(&level.as_str()) {
        Ok(())
    } else {
        Err(validation_err(format!(
            "log_level '{}' is invalid. Must be one of: {}",
            config.log_level,
            VALID_LOG_LEVELS.join(", ")
        )))
    }
}
