use serde_json::Value;

use crate::protocol::canonical::TokenUsage;

const INPUT_KEYS: &[&str] = &["prompt_tokens", "promptTokens", "input_tokens", "inputTokens"];
const OUTPUT_KEYS: &[&str] = &[
    "completion_tokens",
    "completionTokens",
    "output_tokens",
    "outputTokens",
];
const CACHE_READ_KEYS: &[&str] = &["cache_read_input_tokens", "cacheReadInputTokens"];
const CACHE_CREATION_KEYS: &[&str] = &["cache_creation_input_tokens", "cacheCreationInputTokens"];

/// Coalesces usage counters reported under different names and casings.
///
/// Each field keeps the most recently seen value.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageAccumulator {
    usage: TokenUsage,
}

impl UsageAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one upstream `usage` object.
    pub fn merge_value(&mut self, usage: &Value) {
        if !usage.is_object() {
            return;
        }
        if let Some(n) = first_count(usage, INPUT_KEYS) {
            self.usage.input_tokens = Some(n);
        }
        if let Some(n) = first_count(usage, OUTPUT_KEYS) {
            self.usage.output_tokens = Some(n);
        }
        let nested_cached = ["prompt_tokens_details", "promptTokensDetails"]
            .iter()
            .find_map(|key| usage.get(*key))
            .and_then(|details| first_count(details, &["cached_tokens", "cachedTokens"]));
        if let Some(n) = first_count(usage, CACHE_READ_KEYS).or(nested_cached) {
            self.usage.cache_read_input_tokens = Some(n);
        }
        if let Some(n) = first_count(usage, CACHE_CREATION_KEYS) {
            self.usage.cache_creation_input_tokens = Some(n);
        }
    }

    /// Merge an already-typed usage; absent fields keep their earlier value.
    pub fn merge(&mut self, usage: TokenUsage) {
        let fields = [
            (&mut self.usage.input_tokens, usage.input_tokens),
            (&mut self.usage.output_tokens, usage.output_tokens),
            (&mut self.usage.cache_read_input_tokens, usage.cache_read_input_tokens),
            (
                &mut self.usage.cache_creation_input_tokens,
                usage.cache_creation_input_tokens,
            ),
        ];
        for (slot, value) in fields {
            if value.is_some() {
                *slot = value;
            }
        }
    }

    /// The coalesced usage, or `None` when no counter was ever seen.
    #[must_use]
    pub fn snapshot(&self) -> Option<TokenUsage> {
        (!self.usage.is_empty()).then_some(self.usage)
    }
}

/// The first listed key that is present and non-null, read as a non-negative
/// count. A present but non-numeric value yields `None`.
fn first_count(value: &Value, keys: &[&str]) -> Option<u64> {
    let v = keys
        .iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))?;
    v.as_u64().or_else(|| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        v.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}
