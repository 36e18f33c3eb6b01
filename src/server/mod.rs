//! Small HTTP surface over the gateway used by the `byok-gateway` binary.

mod auth;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub use auth::ClientKeys;

use crate::error::{error_payload, GatewayError};
use crate::gateway::{CallOptions, Gateway, GatewayOutcome};
use crate::stream::sse::{data_frame, named_frame, DONE_FRAME};

const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;
const CALL_API_PREFIX: &str = "/call-api/";
const CALL_API_STREAM_PREFIX: &str = "/call-api-stream/";
const UPSTREAM_BASE_URL_HEADER: &str = "x-upstream-base-url";
const UPSTREAM_TOKEN_HEADER: &str = "x-upstream-token";

/// Shared state for every connection.
pub struct ServerState {
    pub gateway: Gateway,
    pub client_keys: ClientKeys,
    /// Cancelled on shutdown; every request runs under a child token.
    pub shutdown: CancellationToken,
}

impl ServerState {
    #[must_use]
    pub fn new(gateway: Gateway, client_keys: ClientKeys) -> Self {
        Self {
            gateway,
            client_keys,
            shutdown: CancellationToken::new(),
        }
    }
}

enum RouteMatch<'a> {
    Health,
    CallApi(&'a str),
    CallApiStream(&'a str),
    MethodNotAllowed,
    NotFound,
}

fn match_route<'a>(method: &Method, path: &'a str) -> RouteMatch<'a> {
    if path == "/" {
        return if method == Method::GET {
            RouteMatch::Health
        } else {
            RouteMatch::MethodNotAllowed
        };
    }
    let (route, endpoint) = if let Some(endpoint) = path.strip_prefix(CALL_API_STREAM_PREFIX) {
        (RouteMatch::CallApiStream(endpoint), endpoint)
    } else if let Some(endpoint) = path.strip_prefix(CALL_API_PREFIX) {
        (RouteMatch::CallApi(endpoint), endpoint)
    } else {
        return RouteMatch::NotFound;
    };
    if endpoint.trim_matches('/').is_empty() {
        RouteMatch::NotFound
    } else if method != Method::POST {
        RouteMatch::MethodNotAllowed
    } else {
        route
    }
}

/// Dispatch a raw HTTP request.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(state: Arc<ServerState>, request: Request<Body>) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path());

    if !matches!(route, RouteMatch::Health | RouteMatch::NotFound) && !state.client_keys.authenticate(&parts.headers) {
        tracing::debug!(path = parts.uri.path(), "rejected request with invalid client key");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"type": "authentication_error", "message": "Invalid API key"}})),
        )
            .into_response());
    }

    let response = match route {
        RouteMatch::Health => health(&state),
        RouteMatch::CallApi(endpoint) => {
            let body = match read_json_body(body).await {
                Ok(value) => value,
                Err(err) => return Ok(err.into_response()),
            };
            call_api(&state, endpoint, &body, &parts.headers).await
        }
        RouteMatch::CallApiStream(endpoint) => {
            let body = match read_json_body(body).await {
                Ok(value) => value,
                Err(err) => return Ok(err.into_response()),
            };
            call_api_stream(&state, endpoint, &body, &parts.headers).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };
    Ok(response)
}

fn health(state: &ServerState) -> Response {
    Json(json!({
        "status": "byok-gateway is running",
        "auth_required": state.client_keys.is_required(),
    }))
    .into_response()
}

async fn read_json_body(body: Body) -> Result<Value, GatewayError> {
    let bytes = body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| GatewayError::InvalidRequest("request body too large (max 8MiB)".to_string()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(&bytes)
        .map_err(|err| GatewayError::InvalidRequest(format!("request body is not valid JSON: {err}")))
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn call_options(headers: &HeaderMap, cancel: CancellationToken) -> CallOptions {
    CallOptions {
        timeout: None,
        cancel,
        upstream_base_url: header_text(headers, UPSTREAM_BASE_URL_HEADER),
        upstream_token: header_text(headers, UPSTREAM_TOKEN_HEADER),
    }
}

async fn call_api(state: &ServerState, endpoint: &str, body: &Value, headers: &HeaderMap) -> Response {
    let cancel = state.shutdown.child_token();
    // Dropping this future (client gone) cancels the call through the guard.
    let _guard = cancel.clone().drop_guard();
    let options = call_options(headers, cancel);
    match state.gateway.complete(endpoint, body, |v| v, &options).await {
        Ok(GatewayOutcome::Handled(value)) => Json(value).into_response(),
        Ok(GatewayOutcome::NotHandled) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(endpoint, error = %err, "call-api failed");
            err.into_response()
        }
    }
}

async fn call_api_stream(state: &ServerState, endpoint: &str, body: &Value, headers: &HeaderMap) -> Response {
    let cancel = state.shutdown.child_token();
    let guard = cancel.clone().drop_guard();
    let options = call_options(headers, cancel);
    let chunks = match state.gateway.stream(endpoint, body, |v| v, &options).await {
        Ok(GatewayOutcome::Handled(chunks)) => chunks,
        Ok(GatewayOutcome::NotHandled) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(endpoint, error = %err, "call-api-stream failed before streaming");
            return err.into_response();
        }
    };

    let endpoint = endpoint.to_string();
    let frames = async_stream::stream! {
        // Held for the body's lifetime; a client disconnect drops the body.
        let _guard = guard;
        let mut chunks = chunks;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(value) => yield Ok::<_, Infallible>(Bytes::from(data_frame(&value.to_string()))),
                Err(err) => {
                    tracing::warn!(endpoint = %endpoint, error = %err, "call-api-stream failed mid-stream");
                    yield Ok(Bytes::from(named_frame("error", &error_payload(&err).to_string())));
                    return;
                }
            }
        }
        yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
    };

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Accept connections until `state.shutdown` is cancelled.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<ServerState>) {
    loop {
        let accepted = tokio::select! {
            () = state.shutdown.cancelled() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => accepted,
        };
        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!("accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let request_state = Arc::clone(&state);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(Arc::clone(&request_state), request.map(Body::new))
        });

        tokio::spawn(async move {
            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, hyper_service)
                .await
            {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
