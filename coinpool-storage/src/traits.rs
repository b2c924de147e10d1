//! Storage traits consumed by the selection layer.
//!
//! Both traits are async and object safe so the coordinator can hold them as
//! `Arc<dyn ...>` and swap backends at startup.

use std::collections::HashSet;

use async_trait::async_trait;
use coinpool_core::{
    CachedToken, CoinPoolResult, PoolCacheState, StateRef, StoredPoolClaimState, TokenAmount,
    TokenPoolKey,
};

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The stored version matched; the value is now at `new_version`.
    Success { new_version: u64 },
    /// Someone else wrote first. Carries what is actually stored now.
    Conflict { actual: StoredPoolClaimState },
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateOutcome::Success { .. })
    }
}

/// Versioned durable store for per-pool claim state.
///
/// # Implementation Requirements
///
/// - `load` of a never-written key returns `StoredPoolClaimState::initial`
///   (version 0), not an error
/// - `update` must compare the stored version with `expected_version` and
///   write in one atomic step; on mismatch it returns the stored state
/// - a successful write stores `expected_version + 1`
#[async_trait]
pub trait PoolStateStore: Send + Sync {
    /// Read the current version and value for a pool.
    async fn load(&self, key: &TokenPoolKey) -> CoinPoolResult<StoredPoolClaimState>;

    /// Persist `new_state` iff the stored version equals `expected_version`.
    async fn update(
        &self,
        key: &TokenPoolKey,
        new_state: &PoolCacheState,
        expected_version: u64,
    ) -> CoinPoolResult<UpdateOutcome>;
}

/// Read access to unspent tokens held in durable ledger storage.
///
/// Filters mirror the selection filter: `owner_hash` is an exact match and
/// `tag_regex` a regular expression over the token tag. A token without a
/// tag never matches a tag filter.
#[async_trait]
pub trait AvailableTokenService: Send + Sync {
    /// Return up to `page_size` unspent tokens of the pool matching the
    /// filter, skipping every ref in `exclude`.
    ///
    /// Callers pass the refs they already hold, so each page reaches tokens
    /// they have not seen yet.
    async fn page_tokens(
        &self,
        pool_key: &TokenPoolKey,
        owner_hash: Option<&str>,
        tag_regex: Option<&str>,
        exclude: &HashSet<StateRef>,
        page_size: usize,
    ) -> CoinPoolResult<Vec<CachedToken>>;

    /// Sum of every unspent token of the pool matching the filter.
    async fn query_balance(
        &self,
        pool_key: &TokenPoolKey,
        owner_hash: Option<&str>,
        tag_regex: Option<&str>,
    ) -> CoinPoolResult<TokenAmount>;
}
