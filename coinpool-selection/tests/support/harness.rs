//! A processor over in-memory backends with a manual clock.

#![allow(dead_code)]

use std::sync::Arc;

use coinpool_core::{
    BalanceQuery, BalanceQueryResponse, CachedToken, ClaimId, ClaimQuery, ClaimQueryResponse,
    ClaimRelease, ClaimReleaseAck, CoinPoolConfig, LedgerChange, StateRef, StoredPoolClaimState,
    TokenAmount, TokenEvent, TokenFilter, TokenPoolKey, TokenResponse,
};
use coinpool_selection::{ProcessOutcome, TokenSelectionDelegatedProcessor};
use coinpool_test_utils::{fixtures, InMemoryLedgerTokens, InMemoryPoolStateStore, ManualClock};

pub struct Harness {
    pub pool: TokenPoolKey,
    pub processor: TokenSelectionDelegatedProcessor,
    pub ledger: Arc<InMemoryLedgerTokens>,
    pub state_store: Arc<InMemoryPoolStateStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(tokens: Vec<CachedToken>) -> Self {
        Self::with_config(fixtures::test_config(), tokens)
    }

    pub fn with_config(config: CoinPoolConfig, tokens: Vec<CachedToken>) -> Self {
        let pool = fixtures::pool_key();
        let ledger = fixtures::ledger_with(&pool, tokens);
        let state_store = Arc::new(InMemoryPoolStateStore::new());
        let clock = fixtures::manual_clock();
        let processor = TokenSelectionDelegatedProcessor::from_config(
            &config,
            state_store.clone(),
            ledger.clone(),
            clock.clone(),
        )
        .expect("test config should be valid");
        Self {
            pool,
            processor,
            ledger,
            state_store,
            clock,
        }
    }

    /// Another processor (another "process") sharing this one's ledger and
    /// claim state store.
    pub fn sibling(&self) -> TokenSelectionDelegatedProcessor {
        TokenSelectionDelegatedProcessor::from_config(
            &fixtures::test_config(),
            self.state_store.clone(),
            self.ledger.clone(),
            self.clock.clone(),
        )
        .expect("test config should be valid")
    }

    async fn respond(&self, event: TokenEvent) -> Option<TokenResponse> {
        match self.processor.process(event).await {
            ProcessOutcome::Completed(response) => response,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    pub async fn claim(&self, request_id: &str, target: u64) -> ClaimQueryResponse {
        self.claim_filtered(request_id, target, TokenFilter::any()).await
    }

    pub async fn claim_filtered(
        &self,
        request_id: &str,
        target: u64,
        filter: TokenFilter,
    ) -> ClaimQueryResponse {
        let event = TokenEvent::ClaimQuery(ClaimQuery {
            request_id: request_id.to_string(),
            pool_key: self.pool.clone(),
            filter,
            target_amount: TokenAmount::from(target),
        });
        match self.respond(event).await {
            Some(TokenResponse::ClaimQueryResponse(r)) => r,
            other => panic!("expected claim response, got {:?}", other),
        }
    }

    pub async fn release(&self, claim_id: ClaimId) -> ClaimReleaseAck {
        let event = TokenEvent::ClaimRelease(ClaimRelease {
            pool_key: self.pool.clone(),
            claim_id,
        });
        match self.respond(event).await {
            Some(TokenResponse::ClaimReleaseAck(ack)) => ack,
            other => panic!("expected release ack, got {:?}", other),
        }
    }

    /// Commit a ledger transaction to the ledger and tell the processor.
    pub async fn ledger_change(&self, produced: Vec<CachedToken>, consumed: &[&str]) {
        let consumed: Vec<StateRef> = consumed.iter().map(|r| StateRef::from(*r)).collect();
        self.ledger
            .apply_change(&self.pool, produced.clone(), consumed.iter())
            .expect("in-memory ledger change should apply");
        let event = TokenEvent::LedgerChange(LedgerChange {
            pool_key: self.pool.clone(),
            produced,
            consumed,
        });
        assert!(self.respond(event).await.is_none());
    }

    pub async fn balance(&self) -> BalanceQueryResponse {
        self.balance_filtered(TokenFilter::any()).await
    }

    pub async fn balance_filtered(&self, filter: TokenFilter) -> BalanceQueryResponse {
        let event = TokenEvent::BalanceQuery(BalanceQuery {
            pool_key: self.pool.clone(),
            filter,
        });
        match self.respond(event).await {
            Some(TokenResponse::BalanceQueryResponse(r)) => r,
            other => panic!("expected balance response, got {:?}", other),
        }
    }

    /// The claim state this process believes is persisted.
    pub fn stored(&self) -> StoredPoolClaimState {
        self.processor
            .stores()
            .get(&self.pool)
            .expect("pool store should exist after an event")
            .current_state()
    }
}
