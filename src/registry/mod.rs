//! Aggregate model listing: the BYOK model registry and the feature-flag
//! overlay injected into the platform's `get-models` response.

pub mod models_cache;
pub mod upstream;

use serde::ser::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::config::{FeatureFlagsMode, ResolvedConfig};
use crate::error::GatewayError;
use crate::routing::EncodedModelId;

pub use models_cache::{CachedModelList, InMemoryModelListCache, ModelListCache};
pub use upstream::{fallback_base, UpstreamSnapshotCache};

const POLL_NEVER_MS: i64 = 2_147_483_647;

/// One selectable `provider: model` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: EncodedModelId,
    pub display_name: String,
}

/// Every BYOK model in picker order plus the default agent chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    pub entries: Vec<RegistryEntry>,
    pub agent_chat_model: String,
}

/// Map serialized in insertion order.
struct OrderedMap<'a, V: Serialize>(&'a [(String, V)]);

impl<V: Serialize> Serialize for OrderedMap<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

fn to_json_string<T: Serialize>(value: &T) -> Result<String, GatewayError> {
    serde_json::to_string(value).map_err(|err| GatewayError::Internal(format!("registry serialization failed: {err}")))
}

impl ModelRegistry {
    /// `{"<displayName>": "<encoded id>"}` as a JSON string.
    ///
    /// # Errors
    ///
    /// Only on serializer failure.
    pub fn registry_json(&self) -> Result<String, GatewayError> {
        let pairs: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|e| (e.display_name.clone(), e.id.encode()))
            .collect();
        to_json_string(&OrderedMap(&pairs))
    }

    /// `{"<encoded id>": {description, disabled, displayName, shortName}}` as a JSON string.
    ///
    /// # Errors
    ///
    /// Only on serializer failure.
    pub fn info_registry_json(&self) -> Result<String, GatewayError> {
        let pairs: Vec<(String, Value)> = self
            .entries
            .iter()
            .map(|e| {
                (
                    e.id.encode(),
                    json!({
                        "description": "",
                        "disabled": false,
                        "displayName": e.display_name,
                        "shortName": e.display_name,
                    }),
                )
            })
            .collect();
        to_json_string(&OrderedMap(&pairs))
    }

    /// The `models` array of the aggregate listing.
    #[must_use]
    pub fn model_list(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|e| {
                    json!({
                        "name": e.id.encode(),
                        "suggested_prefix_char_count": 0,
                        "suggested_suffix_char_count": 0,
                    })
                })
                .collect(),
        )
    }
}

/// Build the registry from each provider's default model and cached list.
///
/// The active provider comes first; within a provider the default model
/// leads and duplicates keep their first position.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when no providers are configured, no
/// provider yields a model, or the active provider has no default model.
pub fn build_registry(config: &ResolvedConfig, cache: &dyn ModelListCache) -> Result<ModelRegistry, GatewayError> {
    let active = config
        .active_provider()
        .ok_or_else(|| GatewayError::Config("No providers are configured".to_string()))?;

    let ordered = std::iter::once(active).chain(config.providers.iter().filter(|p| p.id != active.id));
    let mut entries = Vec::new();
    for provider in ordered {
        let cached = cache.get(&provider.id, &provider.base_url);
        if cached.is_none() {
            tracing::debug!(provider = %provider.id, "no cached model list for provider");
        }
        let mut models: Vec<&str> = Vec::new();
        let candidates = provider
            .default_model()
            .into_iter()
            .chain(cached.iter().flat_map(|c| c.models.iter().map(String::as_str)));
        for model in candidates.map(str::trim).filter(|m| !m.is_empty()) {
            if !models.contains(&model) {
                models.push(model);
            }
        }
        for model in models {
            let id = EncodedModelId::new(&provider.id, model);
            entries.push(RegistryEntry {
                display_name: id.display_name(),
                id,
            });
        }
    }
    if entries.is_empty() {
        return Err(GatewayError::Config(
            "No BYOK models available: check provider models/default_model".to_string(),
        ));
    }

    let default_model = active.default_model().ok_or_else(|| {
        GatewayError::Config(format!(
            "Provider({}) is missing default_model (needed for the agent chat model)",
            active.id
        ))
    })?;
    Ok(ModelRegistry {
        entries,
        agent_chat_model: EncodedModelId::new(&active.id, default_model).encode(),
    })
}

/// `snake_case` to `camelCase`; keys without underscores are returned as-is.
#[must_use]
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for ch in key.chars() {
        if ch == '_' {
            upper = !out.is_empty();
            continue;
        }
        if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Add a camelCase twin for every snake_case key that lacks one.
#[must_use]
pub fn with_camel_aliases(flags: Map<String, Value>) -> Map<String, Value> {
    let mut out = flags.clone();
    for (key, value) in flags {
        if !key.contains('_') {
            continue;
        }
        let camel = snake_to_camel(&key);
        if camel != key && !out.contains_key(&camel) {
            out.insert(camel, value);
        }
    }
    out
}

/// Upstream `feature_flags` as an object; a JSON-string encoding is accepted.
#[must_use]
pub fn parse_feature_flags(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

fn set_both(flags: &mut Map<String, Value>, snake: &str, value: Value) {
    flags.insert(snake_to_camel(snake), value.clone());
    flags.insert(snake.to_string(), value);
}

/// Upstream flags with the registry injected and, in safe mode, the
/// unrelated platform features pinned off.
///
/// # Errors
///
/// Only on registry serialization failure.
pub fn merge_feature_flags(
    upstream: Option<&Value>,
    registry: &ModelRegistry,
    mode: FeatureFlagsMode,
) -> Result<Map<String, Value>, GatewayError> {
    let mut flags = with_camel_aliases(parse_feature_flags(upstream));
    let registry_json = Value::String(registry.registry_json()?);
    set_both(&mut flags, "additional_chat_models", registry_json.clone());
    set_both(&mut flags, "model_registry", registry_json);
    set_both(&mut flags, "model_info_registry", Value::String(registry.info_registry_json()?));
    set_both(&mut flags, "agent_chat_model", Value::String(registry.agent_chat_model.clone()));
    set_both(&mut flags, "enable_model_registry", Value::Bool(true));

    if mode == FeatureFlagsMode::Safe {
        for key in [
            "enable_grpc_to_ide_messaging",
            "enable_commit_session_events",
            "enable_native_remote_mcp",
            "enable_credits_in_settings",
            "enable_credit_banner_in_settings",
        ] {
            set_both(&mut flags, key, Value::Bool(false));
        }
        set_both(&mut flags, "vscode_background_agents_min_version", json!("9999.0.0"));
        for key in [
            "remote_agent_list_polling_interval_ms",
            "remote_agent_chat_history_polling_interval_ms",
            "notification_polling_interval_ms",
        ] {
            set_both(&mut flags, key, json!(POLL_NEVER_MS));
        }
    }
    Ok(flags)
}

/// The aggregate `get-models` result built on an upstream snapshot.
///
/// # Errors
///
/// Only on registry serialization failure.
pub fn get_models_response(
    snapshot: Option<Value>,
    registry: &ModelRegistry,
    mode: FeatureFlagsMode,
) -> Result<Value, GatewayError> {
    let mut base = match snapshot {
        Some(Value::Object(map)) => map,
        _ => match fallback_base() {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    };
    let flags = merge_feature_flags(base.get("feature_flags"), registry, mode)?;
    base.insert("default_model".to_string(), Value::String(registry.agent_chat_model.clone()));
    base.insert("models".to_string(), registry.model_list());
    base.insert("feature_flags".to_string(), Value::Object(flags));
    Ok(Value::Object(base))
}
