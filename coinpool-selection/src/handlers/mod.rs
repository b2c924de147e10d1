//! Event handlers: one transition function per event kind.
//!
//! A handler receives the pool's token cache and a working copy of the pool
//! state, mutates them, and optionally returns a response. It runs inside
//! the pool's drain loop, so it has exclusive access to both.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use coinpool_core::{
    Clock, CoinPoolConfig, CoinPoolResult, DispatchError, PoolCacheState, StateRef, TokenEvent,
    TokenEventKind, TokenFilter, TokenResponse,
};
use coinpool_storage::AvailableTokenService;

use crate::backoff::BackoffManager;
use crate::cache::TokenCache;

pub mod balance_query;
pub mod claim_query;
pub mod claim_release;
pub mod ledger_change;

pub use balance_query::BalanceQueryHandler;
pub use claim_query::ClaimQueryHandler;
pub use claim_release::ClaimReleaseHandler;
pub use ledger_change::LedgerChangeHandler;

/// Transition function for one event kind.
#[async_trait]
pub trait TokenEventHandler: Send + Sync {
    /// The event kind this handler is registered under.
    fn kind(&self) -> TokenEventKind;

    async fn handle(
        &self,
        cache: &mut TokenCache,
        state: &mut PoolCacheState,
        event: &TokenEvent,
    ) -> CoinPoolResult<Option<TokenResponse>>;
}

/// The four standard handlers wired to shared services.
pub fn default_handlers(
    token_service: Arc<dyn AvailableTokenService>,
    backoff: Arc<BackoffManager>,
    config: &CoinPoolConfig,
    clock: Arc<dyn Clock>,
) -> Vec<Arc<dyn TokenEventHandler>> {
    vec![
        Arc::new(ClaimQueryHandler::new(
            Arc::clone(&token_service),
            Arc::clone(&backoff),
            config,
            clock,
        )),
        Arc::new(ClaimReleaseHandler::new()),
        Arc::new(LedgerChangeHandler::new(backoff)),
        Arc::new(BalanceQueryHandler::new(token_service, config.refill_page_size)),
    ]
}

/// Result of paging ledger tokens into a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PageIn {
    pub pages: usize,
    pub added: usize,
    /// The ledger had no further matching token.
    pub exhausted: bool,
}

/// Page tokens matching `filter` into `cache` until `enough` holds or the
/// ledger runs out.
///
/// Every page skips the refs in `exclude`, which grows with each page, so
/// successive pages reach further into the ledger. An unfiltered run that
/// exhausts the ledger marks the cache complete.
pub(crate) async fn page_in<F>(
    token_service: &dyn AvailableTokenService,
    cache: &mut TokenCache,
    filter: &TokenFilter,
    exclude: &mut HashSet<StateRef>,
    page_size: usize,
    mut enough: F,
) -> CoinPoolResult<PageIn>
where
    F: FnMut(&TokenCache) -> bool + Send,
{
    let pool = cache.pool_key().clone();
    let mut result = PageIn::default();
    loop {
        let page = token_service
            .page_tokens(
                &pool,
                filter.owner_hash.as_deref(),
                filter.tag_pattern(),
                exclude,
                page_size,
            )
            .await?;
        result.pages += 1;
        let paged = page.len();
        exclude.extend(page.iter().map(|t| t.state_ref.clone()));
        let added = cache.add_all(page);
        result.added += added;

        if paged < page_size {
            result.exhausted = true;
            break;
        }
        // A full page of refs the cache already knew: the service ignored
        // the exclusion, stop rather than spin.
        if added == 0 || enough(cache) {
            break;
        }
    }

    if result.exhausted && filter.is_unfiltered() {
        cache.mark_complete();
    }
    tracing::debug!(
        pool = %pool,
        pages = result.pages,
        added = result.added,
        exhausted = result.exhausted,
        cached = cache.len(),
        "paged tokens into cache"
    );
    Ok(result)
}

/// Error for an event routed to a handler of another kind.
pub(crate) fn unexpected_event(event: &TokenEvent) -> coinpool_core::CoinPoolError {
    DispatchError::NoHandler { kind: event.kind() }.into()
}
