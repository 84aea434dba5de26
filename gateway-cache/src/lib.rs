//! CacheManager (C7): fingerprint → prior response, with TTL and hit
//! counts, backed by a [`StateStore`].

use std::sync::Arc;

use chrono::Utc;
use gateway_core::model::CacheEntry;
use gateway_store::{StateStore, StoreResult};

/// Stable content fingerprint. The fingerprint is of the exact user
/// message with no normalization beyond what routing already applied
/// (§4.7) — callers control cache bypass via a request flag, not by
/// mutating the text we hash.
pub fn fingerprint(message: &str) -> String {
    blake3::hash(message.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    pub enabled: bool,
    pub ttl_s: u64,
    pub max_entries: usize,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_s: 3600,
            max_entries: 10_000,
        }
    }
}

/// Fingerprint → prior response cache. All mutation (hit-count bump,
/// eviction) is delegated to the underlying [`StateStore`], which is the
/// only place rows are ever written.
pub struct CacheManager {
    store: Arc<dyn StateStore>,
    config: CacheManagerConfig,
}

impl CacheManager {
    pub fn new(store: Arc<dyn StateStore>, config: CacheManagerConfig) -> Self {
        Self { store, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Looks up `(provider, fingerprint(message))`. A hit atomically bumps
    /// the stored hit counter and last-hit timestamp.
    pub async fn get(&self, provider: &str, message: &str) -> StoreResult<Option<CacheEntry>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let fp = fingerprint(message);
        let entry = self.store.cache_get(provider, &fp).await?;
        match entry {
            Some(e) if !self.is_expired(&e) => Ok(Some(e)),
            _ => {
                self.store.cache_record_miss().await?;
                Ok(None)
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let age = Utc::now() - entry.created_at;
        age.num_seconds() as u64 > self.config.ttl_s
    }

    pub async fn put(&self, provider: &str, message: &str, response: &str) -> StoreResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let now = Utc::now();
        let entry = CacheEntry {
            fingerprint: fingerprint(message),
            provider: provider.to_string(),
            response: response.to_string(),
            created_at: now,
            last_hit_at: now,
            hit_count: 0,
        };
        self.store.cache_put(entry).await?;
        self.store.cache_enforce_max_entries(self.config.max_entries).await?;
        Ok(())
    }

    /// Periodic sweep removing expired rows; run from a `tokio::time::interval`
    /// loop in `gateway-cli`.
    pub async fn sweep_expired(&self) -> StoreResult<u64> {
        self.store.cache_cleanup_expired(self.config.ttl_s).await
    }

    pub async fn clear(&self, provider: Option<&str>) -> StoreResult<u64> {
        self.store.cache_clear(provider).await
    }

    pub async fn stats(&self) -> StoreResult<gateway_store::CacheStats> {
        self.store.cache_stats().await
    }

    pub async fn top_entries(&self, n: usize) -> StoreResult<Vec<CacheEntry>> {
        self.store.cache_top_entries(n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::InMemoryStateStore;

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("Hello"));
    }

    #[tokio::test]
    async fn put_then_get_hits() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let mgr = CacheManager::new(store, CacheManagerConfig::default());
        mgr.put("openai", "hi", "hello there").await.unwrap();
        let hit = mgr.get("openai", "hi").await.unwrap();
        assert_eq!(hit.unwrap().response, "hello there");
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let mgr = CacheManager::new(
            store,
            CacheManagerConfig {
                enabled: false,
                ..Default::default()
            },
        );
        mgr.put("openai", "hi", "hello there").await.unwrap();
        let hit = mgr.get("openai", "hi").await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store = Arc::new(InMemoryStateStore::new());
        store
            .cache_put(CacheEntry {
                fingerprint: fingerprint("hi"),
                provider: "openai".into(),
                response: "stale".into(),
                created_at: Utc::now() - chrono::Duration::seconds(10_000),
                last_hit_at: Utc::now() - chrono::Duration::seconds(10_000),
                hit_count: 0,
            })
            .await
            .unwrap();
        let mgr = CacheManager::new(
            store,
            CacheManagerConfig {
                ttl_s: 60,
                ..Default::default()
            },
        );
        let hit = mgr.get("openai", "hi").await.unwrap();
        assert!(hit.is_none());
    }
}
