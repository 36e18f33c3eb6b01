//! Per-call configuration snapshots.
//!
//! The gateway asks its [`ConfigSource`] for a fresh [`ResolvedConfig`] on
//! every call. A snapshot is immutable once handed out, so a config change
//! never reaches a call that is already running.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::secrets::resolve_secret_with;
use super::{load_config, ConfigError, GatewayConfig, ProxyConfig, RoutingRule, TimeoutsConfig};
use crate::error::GatewayError;
use crate::protocol::canonical::ProviderKind;

/// A provider with its secret already resolved to plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub id: String,
    /// Raw `type` string; checked by [`Provider::kind`] when the provider is used.
    pub provider_type: String,
    pub base_url: String,
    pub default_model: Option<String>,
    pub extra_headers: BTreeMap<String, String>,
    pub extra_body: Map<String, Value>,
    pub secret: Option<String>,
}

impl Provider {
    /// Minimal provider for tests and programmatic configs.
    #[must_use]
    pub fn new(id: &str, kind: ProviderKind, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            provider_type: kind.as_str().to_string(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            default_model: None,
            extra_headers: BTreeMap::new(),
            extra_body: Map::new(),
            secret: None,
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: &str) -> Self {
        self.default_model = Some(model.to_string());
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] naming the provider for an unknown type.
    pub fn kind(&self) -> Result<ProviderKind, GatewayError> {
        ProviderKind::parse(&self.provider_type).ok_or_else(|| {
            GatewayError::Config(format!(
                "Provider({}) has unknown type '{}'",
                self.id, self.provider_type
            ))
        })
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the base URL is missing or not http(s).
    pub fn require_base_url(&self) -> Result<&str, GatewayError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(GatewayError::Config(format!("Provider({}) is missing base_url", self.id)));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(GatewayError::Config(format!(
                "Provider({}) base_url must start with http:// or https://",
                self.id
            )));
        }
        Ok(url)
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when no api key or token is configured.
    pub fn require_secret(&self) -> Result<&str, GatewayError> {
        self.secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::Config(format!("Provider({}) is missing api_key/token", self.id)))
    }

    #[must_use]
    pub fn default_model(&self) -> Option<&str> {
        self.default_model
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Immutable configuration snapshot used for exactly one call.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub enabled: bool,
    pub providers: Vec<Provider>,
    pub rules: BTreeMap<String, RoutingRule>,
    pub active_provider_id: Option<String>,
    pub proxy: ProxyConfig,
    pub timeouts: TimeoutsConfig,
}

impl ResolvedConfig {
    /// Enabled snapshot with the given providers and no rules.
    #[must_use]
    pub fn with_providers(providers: Vec<Provider>) -> Self {
        Self {
            enabled: true,
            providers,
            ..Self::default()
        }
    }

    /// Resolve secrets against the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when a secret placeholder names an
    /// unset variable.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] when `lookup` cannot satisfy a
    /// secret placeholder.
    pub fn from_config_with<F>(config: &GatewayConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut providers = Vec::with_capacity(config.providers.len());
        for raw in &config.providers {
            let secret = match raw.api_key.as_deref().or(raw.token.as_deref()) {
                Some(value) => Some(resolve_secret_with(&raw.id, value, &lookup)?),
                None => None,
            };
            providers.push(Provider {
                id: raw.id.clone(),
                provider_type: raw.provider_type.clone(),
                base_url: raw.base_url.clone(),
                default_model: raw.default_model.clone(),
                extra_headers: raw.headers.clone(),
                extra_body: raw.request_defaults.clone(),
                secret: secret.filter(|s| !s.is_empty()),
            });
        }
        Ok(Self {
            enabled: config.enabled,
            providers,
            rules: config.routing.rules.clone(),
            active_provider_id: config.routing.active_provider_id.clone(),
            proxy: config.proxy.clone(),
            timeouts: config.timeouts,
        })
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// The active provider, else the first configured one.
    #[must_use]
    pub fn active_provider(&self) -> Option<&Provider> {
        self.active_provider_id
            .as_deref()
            .and_then(|id| self.provider(id))
            .or_else(|| self.providers.first())
    }

    #[must_use]
    pub fn rule(&self, endpoint: &str) -> Option<&RoutingRule> {
        self.rules.get(endpoint)
    }
}

/// Supplies a configuration snapshot for each call.
pub trait ConfigSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the configuration cannot be
    /// loaded or a secret cannot be resolved.
    fn resolve(&self) -> Result<Arc<ResolvedConfig>, GatewayError>;
}

/// In-memory snapshot, swappable at runtime.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    current: RwLock<Arc<ResolvedConfig>>,
}

impl StaticConfigSource {
    #[must_use]
    pub fn new(config: ResolvedConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Replace the snapshot. Calls already holding the old one keep it.
    pub fn replace(&self, config: ResolvedConfig) {
        *self.current.write() = Arc::new(config);
    }
}

impl ConfigSource for StaticConfigSource {
    fn resolve(&self) -> Result<Arc<ResolvedConfig>, GatewayError> {
        Ok(Arc::clone(&self.current.read()))
    }
}

/// Re-reads a YAML file on every call.
#[derive(Debug, Clone)]
pub struct YamlConfigSource {
    path: PathBuf,
}

impl YamlConfigSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for YamlConfigSource {
    fn resolve(&self) -> Result<Arc<ResolvedConfig>, GatewayError> {
        let path = self.path.to_string_lossy();
        let config = load_config(&path)?;
        Ok(Arc::new(ResolvedConfig::from_config(&config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const YAML: &str = r#"
version: 2
providers:
  - id: oa
    type: openai_compatible
    base_url: https://api.example.com/v1
    token: "${env:OA_KEY}"
    headers:
      x-org: acme
    request_defaults:
      reasoning_effort: low
  - id: an
    type: anthropic_native
    base_url: https://api.anthropic.com
routing:
  active_provider_id: an
"#;

    #[test]
    fn test_from_config_resolves_secrets() {
        let config = parse_config(YAML).unwrap();
        let resolved = ResolvedConfig::from_config_with(&config, |name| {
            (name == "OA_KEY").then(|| "sk-live".to_string())
        })
        .unwrap();
        let oa = resolved.provider("oa").unwrap();
        assert_eq!(oa.require_secret().unwrap(), "sk-live");
        assert_eq!(oa.extra_headers["x-org"], "acme");
        assert_eq!(oa.extra_body["reasoning_effort"], "low");
        assert_eq!(resolved.active_provider().unwrap().id, "an");
    }

    #[test]
    fn test_missing_secret_reported_at_use() {
        let config = parse_config(YAML).unwrap();
        let resolved = ResolvedConfig::from_config_with(&config, |_| Some("k".into())).unwrap();
        let err = resolved.provider("an").unwrap().require_secret().unwrap_err();
        assert!(err.to_string().contains("Provider(an)"));
    }

    #[test]
    fn test_missing_env_fails_resolution() {
        let config = parse_config(YAML).unwrap();
        let err = ResolvedConfig::from_config_with(&config, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv { ref var, .. } if var == "OA_KEY"));
    }

    #[test]
    fn test_provider_use_time_checks() {
        let mut provider = Provider::new("p", ProviderKind::OpenAiCompatible, "");
        assert!(provider.require_base_url().unwrap_err().to_string().contains("Provider(p)"));
        provider.base_url = "ftp://x".into();
        assert!(provider.require_base_url().is_err());
        provider.provider_type = "gemini".into();
        assert!(provider.kind().unwrap_err().to_string().contains("gemini"));
    }

    #[test]
    fn test_static_source_snapshot_is_stable() {
        let source = StaticConfigSource::new(ResolvedConfig::with_providers(vec![Provider::new(
            "a",
            ProviderKind::OpenAiCompatible,
            "https://a.example",
        )]));
        let before = source.resolve().unwrap();
        source.replace(ResolvedConfig::default());
        assert_eq!(before.providers.len(), 1);
        assert!(source.resolve().unwrap().providers.is_empty());
    }

    #[test]
    fn test_active_falls_back_to_first() {
        let mut config = ResolvedConfig::with_providers(vec![
            Provider::new("a", ProviderKind::OpenAiCompatible, "https://a.example"),
            Provider::new("b", ProviderKind::AnthropicNative, "https://b.example"),
        ]);
        config.active_provider_id = Some("missing".into());
        assert_eq!(config.active_provider().unwrap().id, "a");
    }
}
