use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::CallContext;
use crate::error::GatewayError;
use crate::protocol::parse_json_body;

const PARSED_URL_CACHE_MAX_ENTRIES: usize = 256;
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 16;
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Raw response body chunks, transport failures already mapped.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
) -> Result<reqwest::Client, GatewayError> {
    // Per-call deadlines come from `CallContext`, so no client-wide timeout.
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

fn map_reqwest_error(err: &reqwest::Error, url: &url::Url) -> GatewayError {
    let host = url.host_str().unwrap_or_default();
    if err.is_connect() {
        return GatewayError::Transport(format!("connection to {host} failed: {err}"));
    }
    GatewayError::Transport(format!("request to {host} failed: {err}"))
}

/// Shared HTTP client for every upstream call.
///
/// The transport performs exactly one attempt per call; retry policy belongs
/// to the host.
pub struct HttpTransport {
    base_client: OnceLock<Arc<reqwest::Client>>,
    parsed_url_cache: RwLock<FxHashMap<String, Arc<url::Url>>>,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_pool(DEFAULT_POOL_MAX_IDLE_PER_HOST, Some(DEFAULT_POOL_IDLE_TIMEOUT))
    }

    #[must_use]
    pub fn with_pool(pool_max_idle_per_host: usize, pool_idle_timeout: Option<Duration>) -> Self {
        Self {
            base_client: OnceLock::new(),
            parsed_url_cache: RwLock::new(FxHashMap::default()),
            pool_max_idle_per_host: pool_max_idle_per_host.max(1),
            pool_idle_timeout,
        }
    }

    fn client(&self) -> Result<Arc<reqwest::Client>, GatewayError> {
        if let Some(existing) = self.base_client.get() {
            return Ok(existing.clone());
        }
        let built = Arc::new(build_reqwest_client(self.pool_max_idle_per_host, self.pool_idle_timeout)?);
        let _ = self.base_client.set(built.clone());
        Ok(self.base_client.get().cloned().unwrap_or(built))
    }

    fn parsed_url(&self, url: &str) -> Result<Arc<url::Url>, GatewayError> {
        if let Some(cached) = self.parsed_url_cache.read().get(url) {
            return Ok(cached.clone());
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| GatewayError::Config(format!("Invalid upstream URL {url}: {e}")))?;

        let mut cache = self.parsed_url_cache.write();
        if let Some(existing) = cache.get(url) {
            return Ok(existing.clone());
        }
        if cache.len() >= PARSED_URL_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        let parsed = Arc::new(parsed);
        cache.insert(url.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// Execute one request and fail on a non-success status.
    async fn execute(
        &self,
        ctx: &CallContext,
        method: http::Method,
        url: &str,
        headers: &http::HeaderMap,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, GatewayError> {
        let parsed = self.parsed_url(url)?;
        let client = self.client()?;

        let mut request = reqwest::Request::new(method.clone(), parsed.as_ref().clone());
        *request.headers_mut() = headers.clone();
        if let Some(body) = body {
            request
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(reqwest::Body::from(body));
        }

        tracing::debug!(method = %method, url = %parsed, "sending upstream request");
        let response = ctx
            .guard(client.execute(request))
            .await?
            .map_err(|err| map_reqwest_error(&err, &parsed))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = ctx
            .guard(response.text())
            .await?
            .unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            url = %parsed,
            body = %crate::util::preview(&text),
            "upstream returned non-success status"
        );
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            message: format!("{} {}", status.as_u16(), crate::util::preview(&text))
                .trim_end()
                .to_string(),
        })
    }

    async fn read_json(
        ctx: &CallContext,
        label: &str,
        response: reqwest::Response,
    ) -> Result<Value, GatewayError> {
        let text = ctx
            .guard(response.text())
            .await?
            .map_err(|err| GatewayError::Transport(format!("{label} response body could not be read: {err}")))?;
        parse_json_body(label, &text)
    }

    /// POST a JSON body and parse the JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] on a non-success status,
    /// [`GatewayError::Protocol`] for a non-JSON reply, and
    /// [`GatewayError::Timeout`] / [`GatewayError::Cancelled`] from `ctx`.
    pub async fn post_json(
        &self,
        ctx: &CallContext,
        label: &str,
        url: &str,
        headers: &http::HeaderMap,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| GatewayError::Internal(format!("request body serialization failed: {err}")))?;
        let response = self
            .execute(ctx, http::Method::POST, url, headers, Some(Bytes::from(payload)))
            .await?;
        Self::read_json(ctx, label, response).await
    }

    /// GET and parse the JSON reply.
    ///
    /// # Errors
    ///
    /// Same as [`HttpTransport::post_json`].
    pub async fn get_json(
        &self,
        ctx: &CallContext,
        label: &str,
        url: &str,
        headers: &http::HeaderMap,
    ) -> Result<Value, GatewayError> {
        let response = self.execute(ctx, http::Method::GET, url, headers, None).await?;
        Self::read_json(ctx, label, response).await
    }

    /// POST a JSON body and return the response body as a byte stream.
    ///
    /// Only the status line is awaited here. Chunks must be read through
    /// `ctx.guard` by the consumer so cancellation reaches the body read.
    ///
    /// # Errors
    ///
    /// Same as [`HttpTransport::post_json`], minus body parsing.
    pub async fn post_stream(
        &self,
        ctx: &CallContext,
        url: &str,
        headers: &http::HeaderMap,
        body: &Value,
    ) -> Result<ByteStream, GatewayError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| GatewayError::Internal(format!("request body serialization failed: {err}")))?;
        let response = self
            .execute(ctx, http::Method::POST, url, headers, Some(Bytes::from(payload)))
            .await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| GatewayError::Transport(format!("upstream stream read failed: {err}"))));
        Ok(Box::pin(stream))
    }
}
