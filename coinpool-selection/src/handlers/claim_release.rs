//! ClaimRelease: drop a claim so its tokens become selectable again.

use async_trait::async_trait;
use coinpool_core::{
    ClaimReleaseAck, CoinPoolResult, PoolCacheState, TokenEvent, TokenEventKind, TokenResponse,
};

use super::{unexpected_event, TokenEventHandler};
use crate::cache::TokenCache;

/// Releasing an unknown or already released claim is a no-op, not an error.
/// The cache is never touched: total balance only moves on ledger changes.
#[derive(Debug, Default)]
pub struct ClaimReleaseHandler;

impl ClaimReleaseHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenEventHandler for ClaimReleaseHandler {
    fn kind(&self) -> TokenEventKind {
        TokenEventKind::ClaimRelease
    }

    async fn handle(
        &self,
        _cache: &mut TokenCache,
        state: &mut PoolCacheState,
        event: &TokenEvent,
    ) -> CoinPoolResult<Option<TokenResponse>> {
        let TokenEvent::ClaimRelease(release) = event else {
            return Err(unexpected_event(event));
        };

        let removed = state.remove_claim(&release.claim_id);

        match &removed {
            Some(claim) => tracing::info!(
                pool = %release.pool_key,
                claim_id = %claim.claim_id,
                tokens = claim.claimed_tokens.len(),
                "claim released"
            ),
            None => tracing::debug!(
                pool = %release.pool_key,
                claim_id = %release.claim_id,
                "release of unknown claim ignored"
            ),
        }

        Ok(Some(TokenResponse::ClaimReleaseAck(ClaimReleaseAck {
            pool_key: release.pool_key.clone(),
            claim_id: release.claim_id,
            released: removed.is_some(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coinpool_core::{CachedToken, ClaimId, ClaimRelease, TokenAmount, TokenClaim, TokenPoolKey};

    fn key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    fn setup() -> (TokenCache, PoolCacheState, ClaimId) {
        let mut cache = TokenCache::new(key(), 10);
        cache.add(CachedToken::new("tx-0:0", 5));
        cache.add(CachedToken::new("tx-1:0", 5));

        let now = Utc::now();
        let claim = TokenClaim {
            claim_id: ClaimId::now_v7(),
            request_id: None,
            claimed_tokens: vec![CachedToken::new("tx-0:0", 5), CachedToken::new("tx-1:0", 5)],
            created_at: now,
            expires_at: now + Duration::minutes(5),
        };
        let claim_id = claim.claim_id;
        let mut state = PoolCacheState::new(key());
        state.add_claim(claim).unwrap();
        (cache, state, claim_id)
    }

    fn release(claim_id: ClaimId) -> TokenEvent {
        TokenEvent::ClaimRelease(ClaimRelease {
            pool_key: key(),
            claim_id,
        })
    }

    fn ack(response: Option<TokenResponse>) -> ClaimReleaseAck {
        match response {
            Some(TokenResponse::ClaimReleaseAck(ack)) => ack,
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_release_frees_claim_and_keeps_tokens() {
        let (mut cache, mut state, claim_id) = setup();
        let handler = ClaimReleaseHandler::new();

        let ack = ack(handler
            .handle(&mut cache, &mut state, &release(claim_id))
            .await
            .unwrap());
        assert!(ack.released);
        assert_eq!(ack.claim_id, claim_id);
        assert!(state.token_claims.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let (mut cache, mut state, claim_id) = setup();
        let handler = ClaimReleaseHandler::new();

        handler
            .handle(&mut cache, &mut state, &release(claim_id))
            .await
            .unwrap();
        let after_first = state.clone();

        let second = ack(handler
            .handle(&mut cache, &mut state, &release(claim_id))
            .await
            .unwrap());
        assert!(!second.released);
        assert_eq!(state, after_first);
    }

    #[tokio::test]
    async fn test_release_keeps_total_balance() {
        let (mut cache, mut state, claim_id) = setup();
        let handler = ClaimReleaseHandler::new();
        let total = cache.total();

        handler
            .handle(&mut cache, &mut state, &release(claim_id))
            .await
            .unwrap();
        handler
            .handle(&mut cache, &mut state, &release(ClaimId::now_v7()))
            .await
            .unwrap();
        assert_eq!(cache.total(), total);
        assert_eq!(cache.total(), TokenAmount::from(10));
        assert!(!cache.is_tombstoned(&"tx-0:0".into()));
    }
}
