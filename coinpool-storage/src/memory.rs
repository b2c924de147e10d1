//! In-process implementations of the storage traits.
//!
//! `InMemoryPoolStateStore` gives the same compare-and-swap contract as the
//! LMDB backend without touching disk; several coordinators sharing one
//! instance behave like several processes sharing one database.
//! `InMemoryLedgerTokens` is a ledger view that tests and the service binary
//! feed with ledger changes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use coinpool_core::{
    CachedToken, CoinPoolResult, PoolCacheState, StateRef, StorageError, StoredPoolClaimState,
    TokenAmount, TokenFilter, TokenPoolKey,
};

use crate::traits::{AvailableTokenService, PoolStateStore, UpdateOutcome};

// ============================================================================
// POOL STATE STORE
// ============================================================================

/// Versioned claim state held in a shared map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPoolStateStore {
    states: Arc<RwLock<HashMap<TokenPoolKey, StoredPoolClaimState>>>,
}

impl InMemoryPoolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pools that have been written at least once.
    pub fn pool_count(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PoolStateStore for InMemoryPoolStateStore {
    async fn load(&self, key: &TokenPoolKey) -> CoinPoolResult<StoredPoolClaimState> {
        let states = self.states.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(states
            .get(key)
            .cloned()
            .unwrap_or_else(|| StoredPoolClaimState::initial(key.clone())))
    }

    async fn update(
        &self,
        key: &TokenPoolKey,
        new_state: &PoolCacheState,
        expected_version: u64,
    ) -> CoinPoolResult<UpdateOutcome> {
        let mut states = self.states.write().map_err(|_| StorageError::LockPoisoned)?;
        let current = states
            .get(key)
            .cloned()
            .unwrap_or_else(|| StoredPoolClaimState::initial(key.clone()));

        if current.db_version != expected_version {
            return Ok(UpdateOutcome::Conflict { actual: current });
        }

        let next = current.advance(new_state.clone());
        let new_version = next.db_version;
        states.insert(key.clone(), next);
        Ok(UpdateOutcome::Success { new_version })
    }
}

// ============================================================================
// LEDGER VIEW
// ============================================================================

/// Unspent tokens per pool, in the order the ledger produced them.
#[derive(Debug, Default)]
pub struct InMemoryLedgerTokens {
    tokens: RwLock<HashMap<TokenPoolKey, Vec<CachedToken>>>,
    page_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl InMemoryLedgerTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unspent tokens to a pool. Refs already present are ignored.
    pub fn insert_tokens(
        &self,
        pool_key: &TokenPoolKey,
        tokens: impl IntoIterator<Item = CachedToken>,
    ) -> CoinPoolResult<()> {
        self.apply_change(pool_key, tokens, std::iter::empty())
    }

    /// Apply a committed ledger transaction: add `produced`, drop `consumed`.
    pub fn apply_change<'a>(
        &self,
        pool_key: &TokenPoolKey,
        produced: impl IntoIterator<Item = CachedToken>,
        consumed: impl IntoIterator<Item = &'a StateRef>,
    ) -> CoinPoolResult<()> {
        let mut tokens = self.tokens.write().map_err(|_| StorageError::LockPoisoned)?;
        let pool = tokens.entry(pool_key.clone()).or_default();

        let consumed: HashSet<&StateRef> = consumed.into_iter().collect();
        if !consumed.is_empty() {
            pool.retain(|t| !consumed.contains(&t.state_ref));
        }
        for token in produced {
            if !pool.iter().any(|t| t.state_ref == token.state_ref) {
                pool.push(token);
            }
        }
        Ok(())
    }

    /// Number of unspent tokens recorded for a pool.
    pub fn token_count(&self, pool_key: &TokenPoolKey) -> usize {
        self.tokens
            .read()
            .map(|t| t.get(pool_key).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// How many times `page_tokens` has been called.
    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// How many times `query_balance` has been called.
    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    fn matching(
        &self,
        pool_key: &TokenPoolKey,
        owner_hash: Option<&str>,
        tag_regex: Option<&str>,
    ) -> CoinPoolResult<Vec<CachedToken>> {
        let filter = TokenFilter::new(owner_hash.map(str::to_string), tag_regex)?;
        let tokens = self.tokens.read().map_err(|_| StorageError::LockPoisoned)?;
        let Some(pool) = tokens.get(pool_key) else {
            return Ok(Vec::new());
        };
        Ok(pool
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AvailableTokenService for InMemoryLedgerTokens {
    async fn page_tokens(
        &self,
        pool_key: &TokenPoolKey,
        owner_hash: Option<&str>,
        tag_regex: Option<&str>,
        exclude: &HashSet<StateRef>,
        page_size: usize,
    ) -> CoinPoolResult<Vec<CachedToken>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .matching(pool_key, owner_hash, tag_regex)?
            .into_iter()
            .filter(|t| !exclude.contains(&t.state_ref))
            .take(page_size)
            .collect())
    }

    async fn query_balance(
        &self,
        pool_key: &TokenPoolKey,
        owner_hash: Option<&str>,
        tag_regex: Option<&str>,
    ) -> CoinPoolResult<TokenAmount> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let matching = self.matching(pool_key, owner_hash, tag_regex)?;
        Ok(matching.iter().map(|t| &t.amount).sum())
    }
}
