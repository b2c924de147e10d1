//! LedgerChange: fold a committed ledger transaction into the cache.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use coinpool_core::{
    CoinPoolResult, PoolCacheState, StateRef, TokenEvent, TokenEventKind, TokenResponse,
};

use super::{unexpected_event, TokenEventHandler};
use crate::backoff::BackoffManager;
use crate::cache::TokenCache;

/// Adds produced tokens (replacing a cached token with the same ref),
/// retires consumed ones and drops every claim that held a consumed ref.
/// Produces no response.
pub struct LedgerChangeHandler {
    backoff: Arc<BackoffManager>,
}

impl LedgerChangeHandler {
    pub fn new(backoff: Arc<BackoffManager>) -> Self {
        Self { backoff }
    }
}

#[async_trait]
impl TokenEventHandler for LedgerChangeHandler {
    fn kind(&self) -> TokenEventKind {
        TokenEventKind::LedgerChange
    }

    async fn handle(
        &self,
        cache: &mut TokenCache,
        state: &mut PoolCacheState,
        event: &TokenEvent,
    ) -> CoinPoolResult<Option<TokenResponse>> {
        let TokenEvent::LedgerChange(change) = event else {
            return Err(unexpected_event(event));
        };

        let mut added = 0;
        for token in &change.produced {
            if cache.upsert(token.clone()) {
                added += 1;
            }
        }
        for consumed in &change.consumed {
            cache.remove(consumed);
        }

        let consumed: HashSet<&StateRef> = change.consumed.iter().collect();
        let pruned = state.remove_invalid_claims(|r| !consumed.contains(r));

        if !change.produced.is_empty() {
            self.backoff.clear(&change.pool_key);
        }

        tracing::debug!(
            pool = %change.pool_key,
            produced = change.produced.len(),
            added,
            consumed = change.consumed.len(),
            pruned_claims = pruned.len(),
            "applied ledger change"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coinpool_core::{
        CachedToken, ClaimId, LedgerChange, ManualClock, TokenAmount, TokenClaim, TokenPoolKey,
    };

    fn key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    fn backoff() -> Arc<BackoffManager> {
        Arc::new(BackoffManager::new(
            std::time::Duration::from_secs(60),
            Arc::new(ManualClock::starting_now()),
        ))
    }

    fn change(produced: Vec<CachedToken>, consumed: &[&str]) -> TokenEvent {
        TokenEvent::LedgerChange(LedgerChange {
            pool_key: key(),
            produced,
            consumed: consumed.iter().map(|r| StateRef::from(*r)).collect(),
        })
    }

    #[tokio::test]
    async fn test_consumed_token_prunes_claim() {
        let handler = LedgerChangeHandler::new(backoff());
        let mut cache = TokenCache::new(key(), 10);
        cache.add_all(vec![
            CachedToken::new("tx-0:0", 5),
            CachedToken::new("tx-1:0", 5),
            CachedToken::new("tx-2:0", 5),
        ]);
        let now = Utc::now();
        let mut state = PoolCacheState::new(key());
        state
            .add_claim(TokenClaim {
                claim_id: ClaimId::now_v7(),
                request_id: None,
                claimed_tokens: vec![CachedToken::new("tx-0:0", 5), CachedToken::new("tx-1:0", 5)],
                created_at: now,
                expires_at: now + Duration::minutes(5),
            })
            .unwrap();

        let response = handler
            .handle(&mut cache, &mut state, &change(vec![], &["tx-1:0"]))
            .await
            .unwrap();
        assert!(response.is_none());
        assert!(state.token_claims.is_empty());
        assert_eq!(cache.total(), TokenAmount::from(10));
        assert!(cache.is_tombstoned(&"tx-1:0".into()));
    }

    #[tokio::test]
    async fn test_produced_token_replaces_cached_copy() {
        let handler = LedgerChangeHandler::new(backoff());
        let mut cache = TokenCache::new(key(), 10);
        cache.add_all(vec![CachedToken::new("tx-0:0", 5), CachedToken::new("tx-1:0", 5)]);
        let mut state = PoolCacheState::new(key());

        handler
            .handle(
                &mut cache,
                &mut state,
                &change(vec![CachedToken::new("tx-0:0", 8).with_owner("owner-b")], &[]),
            )
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        let token = cache.get(&"tx-0:0".into()).unwrap();
        assert_eq!(token.amount, TokenAmount::from(8));
        assert_eq!(token.owner_hash.as_deref(), Some("owner-b"));
        assert_eq!(cache.total(), TokenAmount::from(13));
    }

    #[tokio::test]
    async fn test_produced_tokens_clear_backoff() {
        let backoff = backoff();
        backoff.update(&key());
        let handler = LedgerChangeHandler::new(backoff.clone());
        let mut cache = TokenCache::new(key(), 10);
        let mut state = PoolCacheState::new(key());

        handler
            .handle(
                &mut cache,
                &mut state,
                &change(vec![CachedToken::new("tx-9:0", 7)], &[]),
            )
            .await
            .unwrap();
        assert!(cache.contains(&"tx-9:0".into()));
        assert!(!backoff.backoff(&key()));
    }

    #[tokio::test]
    async fn test_consume_only_keeps_backoff() {
        let backoff = backoff();
        backoff.update(&key());
        let handler = LedgerChangeHandler::new(backoff.clone());
        let mut cache = TokenCache::new(key(), 10);
        let mut state = PoolCacheState::new(key());

        handler
            .handle(&mut cache, &mut state, &change(vec![], &["tx-0:0"]))
            .await
            .unwrap();
        assert!(backoff.backoff(&key()));
    }
}
