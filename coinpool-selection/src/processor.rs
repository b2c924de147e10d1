//! Entry point: route a request to its pool's store and map the outcome.

use std::sync::Arc;

use coinpool_core::{
    Clock, CoinPoolConfig, CoinPoolError, CoinPoolResult, TokenEvent, TokenPoolKey, TokenResponse,
};
use coinpool_storage::{AvailableTokenService, PoolStateStore};
use tokio::sync::oneshot;

use crate::backoff::BackoffManager;
use crate::cache::TokenCacheRegistry;
use crate::claim_store::ClaimStateStoreCache;
use crate::manager::TokenPoolCacheManager;
use crate::wire::{WireError, WireOutcome, WirePayload, WireRequest, WireResponse};

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Committed. `None` for events without a response.
    Completed(Option<TokenResponse>),
    /// Lost a race on the pool's claim state; resubmit the whole request.
    Transient { pool_key: TokenPoolKey },
    /// Will fail the same way on retry.
    Platform { error_type: String, message: String },
}

impl ProcessOutcome {
    fn platform(err: &CoinPoolError) -> Self {
        ProcessOutcome::Platform {
            error_type: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

pub struct TokenSelectionDelegatedProcessor {
    stores: Arc<ClaimStateStoreCache>,
    manager: Arc<TokenPoolCacheManager>,
}

impl TokenSelectionDelegatedProcessor {
    pub fn new(stores: Arc<ClaimStateStoreCache>, manager: Arc<TokenPoolCacheManager>) -> Self {
        Self { stores, manager }
    }

    /// Wire the standard handlers, caches and stores from `config`.
    pub fn from_config(
        config: &CoinPoolConfig,
        state_store: Arc<dyn PoolStateStore>,
        token_service: Arc<dyn AvailableTokenService>,
        clock: Arc<dyn Clock>,
    ) -> CoinPoolResult<Self> {
        config.validate()?;
        let backoff = Arc::new(BackoffManager::new(
            config.backoff_cooldown,
            Arc::clone(&clock),
        ));
        let manager = TokenPoolCacheManager::with_default_handlers(
            Arc::new(TokenCacheRegistry::new()),
            token_service,
            backoff,
            config,
            clock,
        );
        Ok(Self::new(
            Arc::new(ClaimStateStoreCache::new(state_store, config.commit_mode)),
            Arc::new(manager),
        ))
    }

    pub fn stores(&self) -> &Arc<ClaimStateStoreCache> {
        &self.stores
    }

    pub fn manager(&self) -> &Arc<TokenPoolCacheManager> {
        &self.manager
    }

    /// Run `event` through its pool's claim state store.
    pub async fn process(&self, event: TokenEvent) -> ProcessOutcome {
        let pool_key = event.pool_key().clone();
        let kind = event.kind();

        let store = match self.stores.get_or_create(&pool_key).await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(pool = %pool_key, error = %e, "failed to open claim state store");
                return ProcessOutcome::platform(&e);
            }
        };

        let (response_tx, mut response_rx) = oneshot::channel();
        let manager = Arc::clone(&self.manager);
        let key = pool_key.clone();
        let pending = store.enqueue_request(move |state| async move {
            let (response, state) = manager.process_event(state, &key, &event).await?;
            let _ = response_tx.send(response);
            Ok::<_, CoinPoolError>(state)
        });

        match pending.await {
            // The transform ran in the committed batch, so it sent a response.
            Ok(true) => ProcessOutcome::Completed(response_rx.try_recv().ok().flatten()),
            Ok(false) => {
                tracing::info!(
                    pool = %pool_key,
                    kind = %kind,
                    "claim state conflict, request must be retried"
                );
                ProcessOutcome::Transient { pool_key }
            }
            Err(e) => {
                tracing::error!(
                    pool = %pool_key,
                    kind = %kind,
                    error_type = e.kind(),
                    error = %e,
                    "request failed"
                );
                ProcessOutcome::platform(&e)
            }
        }
    }

    /// Decode, process and address a JSON request.
    ///
    /// Undecodable payloads and platform errors are dead-lettered; transient
    /// errors are replied so the caller resubmits.
    pub async fn process_wire(&self, bytes: &[u8]) -> WireOutcome {
        let request = match WireRequest::decode(bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "dead-lettering undecodable request");
                return WireOutcome::DeadLetter {
                    reason: format!("undecodable request: {}", e),
                    response: None,
                };
            }
        };

        let outcome = match request.to_event() {
            Ok(event) => self.process(event).await,
            Err(e) => ProcessOutcome::platform(&e.into()),
        };

        match outcome {
            ProcessOutcome::Completed(Some(response)) => WireOutcome::Reply(WireResponse::new(
                &request,
                WirePayload::Response(response),
            )),
            ProcessOutcome::Completed(None) => WireOutcome::NoReply,
            ProcessOutcome::Transient { pool_key } => {
                let error = WireError::transient(format!(
                    "claim state for pool {} changed concurrently, retry",
                    pool_key
                ));
                WireOutcome::Reply(WireResponse::new(&request, WirePayload::Error { error }))
            }
            ProcessOutcome::Platform {
                error_type,
                message,
            } => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error_type = %error_type,
                    "dead-lettering request"
                );
                let reason = format!("{}: {}", error_type, message);
                let error = WireError::platform(error_type, message);
                WireOutcome::DeadLetter {
                    reason,
                    response: Some(WireResponse::new(&request, WirePayload::Error { error })),
                }
            }
        }
    }
}
