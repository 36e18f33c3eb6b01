use std::time::Duration;

use crate::config::ConfigError;

/// Error type shared by every gateway operation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Endpoint disabled by routing rule: {0}")]
    EndpointDisabled(String),
    #[error("Unimplemented endpoint: {0}")]
    UnimplementedEndpoint(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },
    #[error("Request cancelled: {0}")]
    Cancelled(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category used by hosts to pick a retry or surface policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Request,
    Transport,
    Timeout,
    Cancelled,
    Protocol,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Config(_) | GatewayError::Internal(_) => ErrorCategory::Configuration,
            GatewayError::InvalidRequest(_)
            | GatewayError::EndpointDisabled(_)
            | GatewayError::UnimplementedEndpoint(_) => ErrorCategory::Request,
            GatewayError::Upstream { .. } | GatewayError::Transport(_) => ErrorCategory::Transport,
            GatewayError::Timeout { .. } => ErrorCategory::Timeout,
            GatewayError::Cancelled(_) => ErrorCategory::Cancelled,
            GatewayError::Protocol(_) => ErrorCategory::Protocol,
        }
    }

    /// Whether a host-side retry could plausibly succeed.
    ///
    /// The gateway never acts on this itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout { .. } | GatewayError::Transport(_) => true,
            GatewayError::Upstream { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled(_))
    }

    /// Build a protocol error carrying a bounded preview of the offending payload.
    pub(crate) fn protocol_with_preview(message: impl std::fmt::Display, payload: &str) -> Self {
        GatewayError::Protocol(format!("{message}: {}", crate::util::preview(payload)))
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

fn http_status_for_error(err: &GatewayError) -> http::StatusCode {
    match err {
        GatewayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
        GatewayError::EndpointDisabled(_) | GatewayError::UnimplementedEndpoint(_) => {
            http::StatusCode::NOT_FOUND
        }
        GatewayError::Upstream { .. } | GatewayError::Transport(_) | GatewayError::Protocol(_) => {
            http::StatusCode::BAD_GATEWAY
        }
        GatewayError::Timeout { .. } => http::StatusCode::GATEWAY_TIMEOUT,
        // 499: client closed request
        GatewayError::Cancelled(_) => {
            http::StatusCode::from_u16(499).unwrap_or(http::StatusCode::BAD_REQUEST)
        }
        GatewayError::Config(_) | GatewayError::Internal(_) => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_type_name(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Configuration => "configuration_error",
        ErrorCategory::Request => "invalid_request_error",
        ErrorCategory::Transport => "upstream_error",
        ErrorCategory::Timeout => "timeout_error",
        ErrorCategory::Cancelled => "cancelled",
        ErrorCategory::Protocol => "protocol_error",
    }
}

/// Render an error as `(status, {"error":{"type","message"}})`.
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let body = error_payload(err);
    (http_status_for_error(err), body)
}

/// JSON error payload without a status code, used for mid-stream error frames.
#[must_use]
pub fn error_payload(err: &GatewayError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "type": error_type_name(err.category()),
            "message": err.to_string(),
            "retryable": err.is_retryable(),
        }
    })
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
