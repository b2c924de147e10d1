//! ClaimQuery: reserve tokens summing to at least a target amount.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coinpool_core::{
    CachedToken, ClaimId, ClaimQuery, ClaimQueryResponse, Clock, CoinPoolConfig, CoinPoolResult,
    PoolCacheState, TokenAmount, TokenClaim, TokenEvent, TokenEventKind, TokenFilter,
    TokenResponse,
};
use coinpool_storage::AvailableTokenService;

use super::{page_in, unexpected_event, TokenEventHandler};
use crate::backoff::BackoffManager;
use crate::cache::TokenCache;

/// Tokens picked for a claim and their sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub tokens: Vec<CachedToken>,
    pub amount: TokenAmount,
}

/// Greedy selection in cache order.
///
/// Walks the matching tokens oldest first, skipping refs held by any claim,
/// and stops as soon as the running sum reaches `target`.
pub fn select_tokens(
    cache: &TokenCache,
    state: &PoolCacheState,
    filter: &TokenFilter,
    target: &TokenAmount,
) -> Selection {
    let claimed = state.claimed_refs();
    let mut selection = Selection {
        tokens: Vec::new(),
        amount: TokenAmount::zero(),
    };
    for token in cache.find(filter) {
        if &selection.amount >= target {
            break;
        }
        if claimed.contains(&token.state_ref) {
            continue;
        }
        selection.amount += &token.amount;
        selection.tokens.push(token.clone());
    }
    selection
}

pub struct ClaimQueryHandler {
    token_service: Arc<dyn AvailableTokenService>,
    backoff: Arc<BackoffManager>,
    clock: Arc<dyn Clock>,
    claim_expiry: chrono::Duration,
    page_size: usize,
}

impl ClaimQueryHandler {
    pub fn new(
        token_service: Arc<dyn AvailableTokenService>,
        backoff: Arc<BackoffManager>,
        config: &CoinPoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_service,
            backoff,
            clock,
            claim_expiry: config.claim_expiry_chrono(),
            page_size: config.refill_page_size,
        }
    }

    /// Page more tokens in from the ledger and select again.
    ///
    /// Skips the page query when the ledger's whole matching balance is
    /// below the target. Pages skip the refs the cache already holds and
    /// stop once the claim can be covered or the ledger runs out. Engages
    /// backoff whenever the claim stays short.
    async fn refill_and_select(
        &self,
        cache: &mut TokenCache,
        state: &PoolCacheState,
        query: &ClaimQuery,
    ) -> CoinPoolResult<Selection> {
        let pool = &query.pool_key;
        let owner = query.filter.owner_hash.as_deref();
        let tag = query.filter.tag_pattern();

        let ledger_balance = self.token_service.query_balance(pool, owner, tag).await?;
        if ledger_balance < query.target_amount {
            self.backoff.update(pool);
            tracing::info!(
                pool = %pool,
                ledger_balance = %ledger_balance,
                target = %query.target_amount,
                "ledger balance below claim target"
            );
            return Ok(select_tokens(cache, state, &query.filter, &query.target_amount));
        }

        let mut exclude = cache.held_refs();
        exclude.extend(state.claimed_refs().into_iter().cloned());
        page_in(
            self.token_service.as_ref(),
            cache,
            &query.filter,
            &mut exclude,
            self.page_size,
            |cache| {
                select_tokens(cache, state, &query.filter, &query.target_amount).amount
                    >= query.target_amount
            },
        )
        .await?;

        let selection = select_tokens(cache, state, &query.filter, &query.target_amount);
        if selection.amount < query.target_amount {
            self.backoff.update(pool);
        }
        Ok(selection)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.claim_expiry)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl TokenEventHandler for ClaimQueryHandler {
    fn kind(&self) -> TokenEventKind {
        TokenEventKind::ClaimQuery
    }

    async fn handle(
        &self,
        cache: &mut TokenCache,
        state: &mut PoolCacheState,
        event: &TokenEvent,
    ) -> CoinPoolResult<Option<TokenResponse>> {
        let TokenEvent::ClaimQuery(query) = event else {
            return Err(unexpected_event(event));
        };
        let pool = &query.pool_key;

        if let Some(existing) = state.claim_for_request(&query.request_id) {
            tracing::debug!(
                pool = %pool,
                request_id = %query.request_id,
                claim_id = %existing.claim_id,
                "returning existing claim for request"
            );
            return Ok(Some(TokenResponse::ClaimQueryResponse(
                ClaimQueryResponse::granted(
                    pool.clone(),
                    existing.claim_id,
                    &existing.claimed_tokens,
                ),
            )));
        }

        let mut selection = select_tokens(cache, state, &query.filter, &query.target_amount);
        if selection.amount < query.target_amount {
            if self.backoff.backoff(pool) {
                tracing::debug!(pool = %pool, "refill suppressed by backoff");
            } else {
                selection = self.refill_and_select(cache, state, query).await?;
            }
        }

        if selection.amount < query.target_amount {
            tracing::info!(
                pool = %pool,
                request_id = %query.request_id,
                available = %selection.amount,
                target = %query.target_amount,
                "claim rejected"
            );
            return Ok(Some(TokenResponse::ClaimQueryResponse(
                ClaimQueryResponse::rejected(
                    pool.clone(),
                    format!(
                        "insufficient tokens: {} available of {} requested",
                        selection.amount, query.target_amount
                    ),
                ),
            )));
        }

        let now = self.clock.now();
        let claim = TokenClaim {
            claim_id: ClaimId::now_v7(),
            request_id: Some(query.request_id.clone()),
            claimed_tokens: selection.tokens,
            created_at: now,
            expires_at: self.expiry_from(now),
        };
        let response = ClaimQueryResponse::granted(pool.clone(), claim.claim_id, &claim.claimed_tokens);
        state.add_claim(claim)?;

        tracing::info!(
            pool = %pool,
            request_id = %query.request_id,
            claim_id = ?response.claim_id,
            tokens = response.selected_refs.len(),
            amount = %response.selected_amount,
            "claim granted"
        );
        Ok(Some(TokenResponse::ClaimQueryResponse(response)))
    }
}
