//! BalanceQuery: report total and unclaimed balance of matching tokens.

use std::sync::Arc;

use async_trait::async_trait;
use coinpool_core::{
    BalanceQueryResponse, CoinPoolResult, PoolCacheState, TokenAmount, TokenEvent,
    TokenEventKind, TokenFilter, TokenResponse,
};
use coinpool_storage::AvailableTokenService;

use super::{page_in, unexpected_event, TokenEventHandler};
use crate::cache::TokenCache;

/// Reads only; the one exception is completing the cache from the ledger
/// first, so the reported total covers every unspent token and claims paging
/// in more supply later do not move it.
pub struct BalanceQueryHandler {
    token_service: Arc<dyn AvailableTokenService>,
    page_size: usize,
}

impl BalanceQueryHandler {
    pub fn new(token_service: Arc<dyn AvailableTokenService>, page_size: usize) -> Self {
        Self {
            token_service,
            page_size,
        }
    }
}

#[async_trait]
impl TokenEventHandler for BalanceQueryHandler {
    fn kind(&self) -> TokenEventKind {
        TokenEventKind::BalanceQuery
    }

    async fn handle(
        &self,
        cache: &mut TokenCache,
        state: &mut PoolCacheState,
        event: &TokenEvent,
    ) -> CoinPoolResult<Option<TokenResponse>> {
        let TokenEvent::BalanceQuery(query) = event else {
            return Err(unexpected_event(event));
        };
        let pool = &query.pool_key;

        if !cache.is_complete() {
            let mut exclude = cache.held_refs();
            let paged = page_in(
                self.token_service.as_ref(),
                cache,
                &TokenFilter::any(),
                &mut exclude,
                self.page_size,
                |_| false,
            )
            .await?;
            tracing::debug!(pool = %pool, added = paged.added, "completed cache for balance query");
        }

        let claimed = state.claimed_refs();
        let mut total_balance = TokenAmount::zero();
        let mut claimed_balance = TokenAmount::zero();
        for token in cache.find(&query.filter) {
            total_balance += &token.amount;
            if claimed.contains(&token.state_ref) {
                claimed_balance += &token.amount;
            }
        }

        Ok(Some(TokenResponse::BalanceQueryResponse(BalanceQueryResponse {
            pool_key: pool.clone(),
            available_balance: total_balance.saturating_sub(&claimed_balance),
            total_balance,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coinpool_core::{BalanceQuery, CachedToken, ClaimId, TokenClaim, TokenPoolKey};
    use coinpool_storage::InMemoryLedgerTokens;

    fn key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    fn handler(ledger: Arc<InMemoryLedgerTokens>) -> BalanceQueryHandler {
        BalanceQueryHandler::new(ledger, 100)
    }

    fn query(filter: TokenFilter) -> TokenEvent {
        TokenEvent::BalanceQuery(BalanceQuery {
            pool_key: key(),
            filter,
        })
    }

    fn balances(response: Option<TokenResponse>) -> (TokenAmount, TokenAmount) {
        match response {
            Some(TokenResponse::BalanceQueryResponse(r)) => (r.total_balance, r.available_balance),
            other => panic!("expected balance response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_available_excludes_claimed_matching_tokens() {
        let handler = handler(Arc::new(InMemoryLedgerTokens::new()));
        let mut cache = TokenCache::new(key(), 10);
        cache.add_all(vec![
            CachedToken::new("a:0", 5).with_tag("vip-1"),
            CachedToken::new("b:0", 7).with_tag("vip-2"),
            CachedToken::new("c:0", 11),
        ]);
        let now = Utc::now();
        let mut state = PoolCacheState::new(key());
        state
            .add_claim(TokenClaim {
                claim_id: ClaimId::now_v7(),
                request_id: None,
                claimed_tokens: vec![CachedToken::new("b:0", 7), CachedToken::new("c:0", 11)],
                created_at: now,
                expires_at: now + Duration::minutes(5),
            })
            .unwrap();

        let (total, available) = balances(
            handler
                .handle(&mut cache, &mut state, &query(TokenFilter::any()))
                .await
                .unwrap(),
        );
        assert_eq!(total, TokenAmount::from(23));
        assert_eq!(available, TokenAmount::from(5));

        let vip = TokenFilter::new(None, Some("^vip-")).unwrap();
        let (total, available) =
            balances(handler.handle(&mut cache, &mut state, &query(vip)).await.unwrap());
        assert_eq!(total, TokenAmount::from(12));
        assert_eq!(available, TokenAmount::from(5));
    }

    #[tokio::test]
    async fn test_cold_cache_is_warmed_once() {
        let ledger = Arc::new(InMemoryLedgerTokens::new());
        ledger
            .insert_tokens(&key(), vec![CachedToken::new("a:0", 5), CachedToken::new("b:0", 5)])
            .unwrap();
        let handler = handler(ledger.clone());
        let mut cache = TokenCache::new(key(), 10);
        let mut state = PoolCacheState::new(key());

        let (total, _) = balances(
            handler
                .handle(&mut cache, &mut state, &query(TokenFilter::any()))
                .await
                .unwrap(),
        );
        assert_eq!(total, TokenAmount::from(10));

        handler
            .handle(&mut cache, &mut state, &query(TokenFilter::any()))
            .await
            .unwrap();
        assert_eq!(ledger.page_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_ledger_is_paged_once() {
        let ledger = Arc::new(InMemoryLedgerTokens::new());
        let handler = handler(ledger.clone());
        let mut cache = TokenCache::new(key(), 10);
        let mut state = PoolCacheState::new(key());

        for _ in 0..3 {
            let (total, available) = balances(
                handler
                    .handle(&mut cache, &mut state, &query(TokenFilter::any()))
                    .await
                    .unwrap(),
            );
            assert!(total.is_zero());
            assert!(available.is_zero());
        }
        assert_eq!(ledger.page_calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_cache_is_completed_across_pages() {
        let ledger = Arc::new(InMemoryLedgerTokens::new());
        ledger
            .insert_tokens(&key(), (0..5).map(|i| CachedToken::new(format!("tx-{}:0", i), 5)))
            .unwrap();
        let handler = BalanceQueryHandler::new(ledger.clone(), 2);
        // A claim already paged in the first two tokens.
        let mut cache = TokenCache::new(key(), 10);
        cache.add_all(vec![CachedToken::new("tx-0:0", 5), CachedToken::new("tx-1:0", 5)]);
        let mut state = PoolCacheState::new(key());

        let (total, available) = balances(
            handler
                .handle(&mut cache, &mut state, &query(TokenFilter::any()))
                .await
                .unwrap(),
        );
        assert_eq!(total, TokenAmount::from(25));
        assert_eq!(available, TokenAmount::from(25));
        assert!(cache.is_complete());
        assert_eq!(ledger.page_calls(), 2);

        handler
            .handle(&mut cache, &mut state, &query(TokenFilter::any()))
            .await
            .unwrap();
        assert_eq!(ledger.page_calls(), 2);
    }
}
