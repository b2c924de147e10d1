//! Process-wide map from pool key to its claim state store.

use std::sync::Arc;

use coinpool_core::{CoinPoolResult, CommitMode, TokenPoolKey};
use coinpool_storage::PoolStateStore;
use dashmap::DashMap;

use super::store::ClaimStateStore;

/// Hands out exactly one `ClaimStateStore` per pool for the life of the
/// process. Stores are created lazily from the durable state.
pub struct ClaimStateStoreCache {
    stores: DashMap<TokenPoolKey, Arc<ClaimStateStore>>,
    backing: Arc<dyn PoolStateStore>,
    commit_mode: CommitMode,
}

impl ClaimStateStoreCache {
    pub fn new(backing: Arc<dyn PoolStateStore>, commit_mode: CommitMode) -> Self {
        Self {
            stores: DashMap::new(),
            backing,
            commit_mode,
        }
    }

    /// The store for `key`, loading its durable state on first use.
    ///
    /// Two callers racing on a cold pool may both load; only the first
    /// insert wins and both get that store.
    pub async fn get_or_create(&self, key: &TokenPoolKey) -> CoinPoolResult<Arc<ClaimStateStore>> {
        if let Some(store) = self.get(key) {
            return Ok(store);
        }

        let initial = self.backing.load(key).await?;
        let version = initial.db_version;
        let store = self.stores.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(pool = %key, version, "created claim state store");
            Arc::new(ClaimStateStore::new(
                initial,
                Arc::clone(&self.backing),
                self.commit_mode,
            ))
        });
        Ok(Arc::clone(store.value()))
    }

    pub fn get(&self, key: &TokenPoolKey) -> Option<Arc<ClaimStateStore>> {
        self.stores.get(key).map(|store| Arc::clone(store.value()))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
