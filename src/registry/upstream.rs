//! Platform `get-models` snapshot used as the base of the aggregate listing.

use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::transport::{join_url, CallContext, HttpTransport};

pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Base object used when no upstream snapshot is available.
#[must_use]
pub fn fallback_base() -> Value {
    json!({
        "default_model": "",
        "feature_flags": {},
        "languages": [],
        "models": [],
        "user": {},
        "user_tier": "unknown"
    })
}

/// Last successful snapshot per platform base URL.
#[derive(Debug)]
pub struct UpstreamSnapshotCache {
    entries: RwLock<FxHashMap<String, (Instant, Value)>>,
    max_age: Duration,
}

impl Default for UpstreamSnapshotCache {
    fn default() -> Self {
        Self::new(SNAPSHOT_MAX_AGE)
    }
}

impl UpstreamSnapshotCache {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            max_age,
        }
    }

    /// Fresh snapshot for `base_url`, if any.
    #[must_use]
    pub fn get(&self, base_url: &str) -> Option<Value> {
        let entries = self.entries.read();
        let (stored_at, value) = entries.get(base_url.trim())?;
        if stored_at.elapsed() > self.max_age {
            tracing::debug!(base_url, "upstream get-models snapshot expired");
            return None;
        }
        Some(value.clone())
    }

    pub fn put(&self, base_url: &str, value: Value) {
        self.entries
            .write()
            .insert(base_url.trim().to_string(), (Instant::now(), value));
    }
}

/// POST `{base}/get-models` with an empty body.
///
/// # Errors
///
/// Transport and status errors from the call, or [`GatewayError::Protocol`]
/// when the reply is not a JSON object.
pub async fn fetch_snapshot(
    transport: &HttpTransport,
    ctx: &CallContext,
    base_url: &str,
    token: &str,
) -> Result<Value, GatewayError> {
    let url = join_url(base_url, "get-models");
    let mut headers = http::HeaderMap::new();
    let auth = http::HeaderValue::from_str(&crate::adapter::bearer(token))
        .map_err(|_| GatewayError::Config("get-models token is not a valid header value".to_string()))?;
    headers.insert(http::header::AUTHORIZATION, auth);
    tracing::debug!(url = %url, "fetching upstream get-models snapshot");
    let value = transport.post_json(ctx, "get-models", &url, &headers, &json!({})).await?;
    if !value.is_object() {
        return Err(GatewayError::protocol_with_preview(
            "get-models response is not a JSON object",
            &value.to_string(),
        ));
    }
    Ok(value)
}

/// Snapshot to build on: a fresh fetch when credentials are known, else (or
/// on failure) the cached one, else `None`.
///
/// # Errors
///
/// Only cancellation propagates; every other fetch failure falls back.
pub async fn resolve_snapshot(
    transport: &HttpTransport,
    cache: &UpstreamSnapshotCache,
    ctx: &CallContext,
    base_url: &str,
    token: &str,
) -> Result<Option<Value>, GatewayError> {
    let base_url = base_url.trim();
    if base_url.is_empty() {
        return Ok(None);
    }
    let cached = cache.get(base_url);
    if token.trim().is_empty() {
        return Ok(cached);
    }
    match fetch_snapshot(transport, ctx, base_url, token.trim()).await {
        Ok(value) => {
            cache.put(base_url, value.clone());
            Ok(Some(value))
        }
        Err(err) if err.is_cancelled() => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, base_url, "upstream get-models failed, using cached snapshot");
            Ok(cached)
        }
    }
}
