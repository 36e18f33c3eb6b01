use crate::error::GatewayError;

pub const BYOK_PREFIX: &str = "byok:";

/// A `byok:<providerId>:<modelId>` reference to a specific provider and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedModelId {
    pub provider_id: String,
    pub model_id: String,
}

impl EncodedModelId {
    #[must_use]
    pub fn new(provider_id: &str, model_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
        }
    }

    /// Parse an encoded id. `Ok(None)` when the string is not `byok:`-prefixed.
    ///
    /// The provider id ends at the first colon after the prefix, so model
    /// ids may themselves contain colons.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the prefix is present but either
    /// part is empty or the separator is missing.
    pub fn parse(raw: &str) -> Result<Option<Self>, GatewayError> {
        let raw = raw.trim();
        let Some(rest) = raw.strip_prefix(BYOK_PREFIX) else {
            return Ok(None);
        };
        match rest.split_once(':') {
            Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Some(Self::new(provider.trim(), model.trim())))
            }
            _ => Err(GatewayError::Config(format!("Malformed byok model id: {raw}"))),
        }
    }

    /// `byok:<providerId>:<modelId>`, same as the `Display` form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// `"<providerId>: <modelId>"`, the label shown in model pickers.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}: {}", self.provider_id, self.model_id)
    }
}

impl std::fmt::Display for EncodedModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{BYOK_PREFIX}{}:{}", self.provider_id, self.model_id)
    }
}
