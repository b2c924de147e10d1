//! Per-event claim maintenance and handler dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use coinpool_core::{
    Clock, CoinPoolConfig, CoinPoolResult, DispatchError, PoolCacheState, TokenEvent,
    TokenEventKind, TokenPoolKey, TokenResponse,
};
use coinpool_storage::AvailableTokenService;

use crate::backoff::BackoffManager;
use crate::cache::TokenCacheRegistry;
use crate::handlers::{default_handlers, TokenEventHandler};

/// Runs one event against one pool's state.
///
/// Before dispatching, every event:
/// 1. reseeds the pool's token cache from the tokens recorded in durable
///    claims (unless they are known to be consumed)
/// 2. drops claims referencing refs that are no longer cached
/// 3. drops expired claims
///
/// Dispatch is by event kind; a kind with no registered handler is an error.
pub struct TokenPoolCacheManager {
    caches: Arc<TokenCacheRegistry>,
    handlers: HashMap<TokenEventKind, Arc<dyn TokenEventHandler>>,
    clock: Arc<dyn Clock>,
}

impl TokenPoolCacheManager {
    /// A manager with no handlers registered.
    pub fn new(caches: Arc<TokenCacheRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            caches,
            handlers: HashMap::new(),
            clock,
        }
    }

    /// A manager with the four standard handlers.
    pub fn with_default_handlers(
        caches: Arc<TokenCacheRegistry>,
        token_service: Arc<dyn AvailableTokenService>,
        backoff: Arc<BackoffManager>,
        config: &CoinPoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handlers = default_handlers(token_service, backoff, config, Arc::clone(&clock));
        handlers
            .into_iter()
            .fold(Self::new(caches, clock), |manager, handler| {
                manager.with_handler(handler)
            })
    }

    /// Register a handler under its kind, replacing any previous one.
    pub fn with_handler(mut self, handler: Arc<dyn TokenEventHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn caches(&self) -> &Arc<TokenCacheRegistry> {
        &self.caches
    }

    /// Apply `event` to `state`, returning the handler's response and the
    /// updated state.
    pub async fn process_event(
        &self,
        state: PoolCacheState,
        pool_key: &TokenPoolKey,
        event: &TokenEvent,
    ) -> CoinPoolResult<(Option<TokenResponse>, PoolCacheState)> {
        if event.pool_key() != pool_key {
            return Err(DispatchError::PoolMismatch {
                expected: pool_key.clone(),
                got: event.pool_key().clone(),
            }
            .into());
        }
        let handler = self
            .handlers
            .get(&event.kind())
            .cloned()
            .ok_or(DispatchError::NoHandler { kind: event.kind() })?;

        let cache = self.caches.get_or_create(pool_key);
        let mut cache = cache.lock().await;
        let mut state = state;

        let reseeded = cache.reseed(&state);
        let invalid = state.remove_invalid_claims(|r| cache.contains(r));
        let expired = state.remove_expired_claims(self.clock.now());

        if reseeded > 0 || !invalid.is_empty() || !expired.is_empty() {
            tracing::debug!(
                pool = %pool_key,
                reseeded,
                invalid = invalid.len(),
                expired = expired.len(),
                "claim maintenance"
            );
        }

        let response = handler.handle(&mut cache, &mut state, event).await?;
        Ok((response, state))
    }
}
