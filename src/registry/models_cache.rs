use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// One provider's last fetched model list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelList {
    pub base_url: String,
    pub updated_at_ms: u64,
    pub models: Vec<String>,
}

/// Per-provider model lists keyed by `(provider id, base URL)`.
///
/// An entry written for one base URL is invisible under another, so pointing
/// a provider at a new endpoint retires its old list.
pub trait ModelListCache: Send + Sync {
    fn get(&self, provider_id: &str, base_url: &str) -> Option<CachedModelList>;
    fn put(&self, provider_id: &str, base_url: &str, models: Vec<String>);
}

fn base_url_key(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    format!("{trimmed}/")
}

#[derive(Debug, Default)]
pub struct InMemoryModelListCache {
    entries: RwLock<FxHashMap<String, CachedModelList>>,
}

impl InMemoryModelListCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ModelListCache for InMemoryModelListCache {
    fn get(&self, provider_id: &str, base_url: &str) -> Option<CachedModelList> {
        let entries = self.entries.read();
        let entry = entries.get(provider_id.trim())?;
        if entry.base_url != base_url_key(base_url) {
            tracing::debug!(
                provider = provider_id,
                cached_base_url = %entry.base_url,
                base_url,
                "model list cache entry belongs to another base url"
            );
            return None;
        }
        Some(entry.clone())
    }

    fn put(&self, provider_id: &str, base_url: &str, models: Vec<String>) {
        let provider_id = provider_id.trim();
        let models: Vec<String> = models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if provider_id.is_empty() || base_url.trim().is_empty() || models.is_empty() {
            tracing::debug!(provider = provider_id, "ignoring empty model list cache write");
            return;
        }
        self.entries.write().insert(
            provider_id.to_string(),
            CachedModelList {
                base_url: base_url_key(base_url),
                updated_at_ms: crate::util::unix_now_ms(),
                models,
            },
        );
    }
}
