//! Secret indirection: `${env:NAME}` placeholders are resolved from the
//! process environment, anything else is used verbatim.

use super::ConfigError;

/// Name of the environment variable referenced by a `${env:NAME}` placeholder.
#[must_use]
pub fn env_placeholder(raw: &str) -> Option<&str> {
    let name = raw.trim().strip_prefix("${env:")?.strip_suffix('}')?.trim();
    (!name.is_empty() && !name.contains('}')).then_some(name)
}

/// Resolve a secret, looking placeholders up through `lookup`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when a placeholder names a variable
/// that `lookup` cannot provide.
pub fn resolve_secret_with<F>(owner: &str, raw: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(var) = env_placeholder(raw) else {
        return Ok(raw.trim().to_string());
    };
    match lookup(var).map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv {
            provider: owner.to_string(),
            var: var.to_string(),
        }),
    }
}

/// Resolve a secret against the real process environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when the referenced variable is unset.
pub fn resolve_secret(owner: &str, raw: &str) -> Result<String, ConfigError> {
    resolve_secret_with(owner, raw, |name| std::env::var(name).ok())
}
