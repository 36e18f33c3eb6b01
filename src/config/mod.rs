pub mod resolve;
pub mod secrets;
pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::resolve::{
    ConfigSource, Provider, ResolvedConfig, StaticConfigSource, YamlConfigSource,
};
use self::validation::validate_config;

/// Only configuration version understood by this gateway.
pub const CONFIG_VERSION: u32 = 2;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Provider({provider}) secret references missing environment variable {var}")]
    MissingEnv { provider: String, var: String },
}

/// Policy for the platform feature flags returned by the aggregate model listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeatureFlagsMode {
    #[default]
    Safe,
    Passthrough,
}

/// HTTP service settings for the bundled binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8790
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
        }
    }
}

/// Upstream platform endpoint consulted by the aggregate model listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub feature_flags_mode: FeatureFlagsMode,
}

/// One configured model provider as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_defaults: serde_json::Map<String, serde_json::Value>,
}

/// Per-endpoint override of provider, model, and enabled state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl RoutingRule {
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }
}

/// Active provider selection plus the per-endpoint rule table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub active_provider_id: Option<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, RoutingRule>,
}

/// Timeouts applied when the caller does not pass one explicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_ms: u64,
    #[serde(default = "default_models_timeout_ms")]
    pub models_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_models_timeout_ms() -> u64 {
    12_000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout_ms(),
            models_ms: default_models_timeout_ms(),
        }
    }
}

/// Top-level gateway configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

/// Parse, normalize, and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = serde_yaml::from_str(contents)?;
    validation::normalize_config(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<GatewayConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
