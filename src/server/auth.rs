use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashSet;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Compact key index used to authenticate service clients.
#[derive(Debug)]
pub enum ClientKeys {
    /// No keys configured; every request is accepted.
    Open,
    Single { raw: Box<str>, bearer: Box<str> },
    Multiple(FxHashSet<String>),
}

impl ClientKeys {
    /// Build the index, ignoring blank keys.
    #[must_use]
    pub fn from_keys(keys: &[String]) -> Self {
        let mut allowed: FxHashSet<String> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        match allowed.len() {
            0 => ClientKeys::Open,
            1 => match allowed.drain().next() {
                Some(single_key) => ClientKeys::Single {
                    bearer: format!("Bearer {single_key}").into_boxed_str(),
                    raw: single_key.into_boxed_str(),
                },
                None => ClientKeys::Open,
            },
            _ => ClientKeys::Multiple(allowed),
        }
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        !matches!(self, ClientKeys::Open)
    }

    /// Accepts `Authorization: Bearer <key>` or `x-api-key: <key>`.
    #[must_use]
    pub fn authenticate(&self, headers: &http::HeaderMap) -> bool {
        match self {
            ClientKeys::Open => true,
            ClientKeys::Single { raw, bearer } => {
                headers
                    .get(AUTHORIZATION)
                    .is_some_and(|v| v.as_bytes() == bearer.as_bytes())
                    || headers
                        .get(X_API_KEY)
                        .is_some_and(|v| v.as_bytes() == raw.as_bytes())
            }
            ClientKeys::Multiple(allowed) => extract_client_key(headers).is_some_and(|key| allowed.contains(key)),
        }
    }
}

fn extract_client_key(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get(X_API_KEY).and_then(|v| v.to_str().ok()))
}
