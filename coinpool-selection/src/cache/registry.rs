//! Per-process registry of token caches, one per pool.

use std::sync::Arc;

use coinpool_core::constants::MAX_TOMBSTONES;
use coinpool_core::TokenPoolKey;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::TokenCache;

/// Lazily creates and hands out each pool's `TokenCache`.
///
/// Constructed once per process and shared by `Arc`. A cache is locked only
/// while a transform for its pool runs, and transforms for one pool run one
/// at a time, so the lock is never contended in practice.
#[derive(Debug)]
pub struct TokenCacheRegistry {
    caches: DashMap<TokenPoolKey, Arc<Mutex<TokenCache>>>,
    max_tombstones: usize,
}

impl Default for TokenCacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCacheRegistry {
    pub fn new() -> Self {
        Self::with_max_tombstones(MAX_TOMBSTONES)
    }

    pub fn with_max_tombstones(max_tombstones: usize) -> Self {
        Self {
            caches: DashMap::new(),
            max_tombstones,
        }
    }

    /// Get the cache for `pool_key`, creating an empty one on first use.
    pub fn get_or_create(&self, pool_key: &TokenPoolKey) -> Arc<Mutex<TokenCache>> {
        if let Some(cache) = self.caches.get(pool_key) {
            return Arc::clone(cache.value());
        }
        let max_tombstones = self.max_tombstones;
        let cache = self.caches.entry(pool_key.clone()).or_insert_with(|| {
            tracing::debug!(pool = %pool_key, "created token cache");
            Arc::new(Mutex::new(TokenCache::new(pool_key.clone(), max_tombstones)))
        });
        Arc::clone(cache.value())
    }

    pub fn get(&self, pool_key: &TokenPoolKey) -> Option<Arc<Mutex<TokenCache>>> {
        self.caches.get(pool_key).map(|c| Arc::clone(c.value()))
    }

    /// Number of pools with a cache.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinpool_core::CachedToken;

    #[tokio::test]
    async fn test_same_pool_shares_cache() {
        let registry = TokenCacheRegistry::new();
        let key = TokenPoolKey::new("alice", "cash", "issuer-1", "USD");

        let first = registry.get_or_create(&key);
        first.lock().await.add(CachedToken::new("tx:0", 5));

        let second = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_pools_are_isolated() {
        let registry = TokenCacheRegistry::new();
        let usd = TokenPoolKey::new("alice", "cash", "issuer-1", "USD");
        let eur = TokenPoolKey::new("alice", "cash", "issuer-1", "EUR");

        registry.get_or_create(&usd).lock().await.add(CachedToken::new("tx:0", 5));
        assert!(registry.get_or_create(&eur).lock().await.is_empty());
        assert!(registry.get(&TokenPoolKey::new("bob", "cash", "i", "USD")).is_none());
    }
}
