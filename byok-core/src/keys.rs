//! Provider key lookup
//!
//! The backend's provider-filtered key list is authoritative. [`KeyCache`]
//! keeps a non-empty list for the most recently used provider and drops it
//! when the selection moves to another provider or the key set changes.

use crate::error::ChatError;
use crate::protocol::{normalize_provider, ApiKey};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type CachedKeys = Option<(String, Vec<ApiKey>)>;

/// Source of the active keys for a provider
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Active keys whose provider matches `provider` case-insensitively
    async fn active_keys(&self, provider: &str) -> Result<Vec<ApiKey>, ChatError>;
}

/// Read-through cache over a [`KeyStore`]
///
/// An empty result is never cached, so a key added after a credential
/// failure is seen by the next lookup.
pub struct KeyCache {
    inner: Arc<dyn KeyStore>,
    cached: Mutex<CachedKeys>,
}

impl KeyCache {
    pub fn new(inner: Arc<dyn KeyStore>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }

    /// Forget the cached list
    pub fn invalidate(&self) {
        if self.slot().take().is_some() {
            debug!("Key cache invalidated");
        }
    }

    /// Provider the cache currently holds keys for
    pub fn cached_provider(&self) -> Option<String> {
        self.slot().as_ref().map(|(provider, _)| provider.clone())
    }

    fn slot(&self) -> MutexGuard<'_, CachedKeys> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, provider: &str) -> Option<Vec<ApiKey>> {
        match self.slot().as_ref() {
            Some((cached_provider, keys)) if cached_provider == provider => Some(keys.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl KeyStore for KeyCache {
    async fn active_keys(&self, provider: &str) -> Result<Vec<ApiKey>, ChatError> {
        let provider = normalize_provider(provider);
        if let Some(keys) = self.lookup(&provider) {
            debug!("Key cache hit for provider {}", provider);
            return Ok(keys);
        }

        debug!("Key cache miss for provider {}", provider);
        let keys = self.inner.active_keys(&provider).await?;

        let mut slot = self.slot();
        if keys.is_empty() {
            *slot = None;
        } else {
            *slot = Some((provider, keys.clone()));
        }
        Ok(keys)
    }
}

/// Choose the key for a send: a key bound to `model` wins, otherwise the
/// first active key
pub fn select_key<'a>(keys: &'a [ApiKey], model: &str) -> Option<&'a ApiKey> {
    keys.iter()
        .find(|key| key.is_active && key.model_name == model)
        .or_else(|| keys.iter().find(|key| key.is_active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(id: &str, provider: &str, model: &str, active: bool) -> ApiKey {
        ApiKey {
            id: id.to_string(),
            provider: provider.to_string(),
            model_name: model.to_string(),
            key_name: format!("{} key", id),
            is_active: active,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    struct CountingStore {
        keys: Vec<ApiKey>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyStore for CountingStore {
        async fn active_keys(&self, provider: &str) -> Result<Vec<ApiKey>, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .keys
                .iter()
                .filter(|k| k.is_active && normalize_provider(&k.provider) == provider)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_select_prefers_model_match() {
        let keys = vec![
            key("k1", "openai", "gpt-3.5-turbo", true),
            key("k2", "openai", "gpt-4", true),
        ];
        assert_eq!(select_key(&keys, "gpt-4").unwrap().id, "k2");
        assert_eq!(select_key(&keys, "gpt-4o").unwrap().id, "k1");
    }

    #[test]
    fn test_select_skips_inactive() {
        let keys = vec![
            key("k1", "openai", "gpt-4", false),
            key("k2", "openai", "gpt-3.5-turbo", true),
        ];
        assert_eq!(select_key(&keys, "gpt-4").unwrap().id, "k2");
        assert!(select_key(&keys[..1], "gpt-4").is_none());
    }

    #[tokio::test]
    async fn test_cache_hits_and_invalidation() {
        let store = Arc::new(CountingStore {
            keys: vec![
                key("k1", "OpenAI", "gpt-4", true),
                key("k2", "anthropic", "claude-3", true),
            ],
            calls: AtomicUsize::new(0),
        });
        let cache = KeyCache::new(store.clone());

        assert_eq!(cache.active_keys("openai").await.unwrap().len(), 1);
        assert_eq!(cache.active_keys("OPENAI").await.unwrap().len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_provider().as_deref(), Some("openai"));

        let keys = cache.active_keys("anthropic").await.unwrap();
        assert_eq!(keys[0].id, "k2");
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);

        cache.invalidate();
        assert!(cache.cached_provider().is_none());
        cache.active_keys("anthropic").await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_cached() {
        let store = Arc::new(CountingStore {
            keys: vec![key("k1", "anthropic", "claude-3", true)],
            calls: AtomicUsize::new(0),
        });
        let cache = KeyCache::new(store.clone());

        assert!(cache.active_keys("openai").await.unwrap().is_empty());
        assert!(cache.cached_provider().is_none());
        assert!(cache.active_keys("openai").await.unwrap().is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_recovers_poisoned_lock() {
        let store = Arc::new(CountingStore {
            keys: vec![key("k1", "openai", "gpt-4", true)],
            calls: AtomicUsize::new(0),
        });
        let cache = KeyCache::new(store.clone());
        cache.active_keys("openai").await.unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cache.cached.lock().unwrap();
            panic!("poison the key cache");
        }));
        assert!(poisoned.is_err());
        assert!(cache.cached.is_poisoned());

        assert_eq!(cache.cached_provider().as_deref(), Some("openai"));
        cache.invalidate();
        assert!(cache.cached_provider().is_none());
        cache.active_keys("openai").await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
