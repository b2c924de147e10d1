//! coinpool Selection - Token Selection Cache and Claim Coordinator
//!
//! Serves claim, release, ledger-change and balance requests for fungible
//! token pools. Each pool has:
//! - a process-local `TokenCache` of unspent tokens (soft, rebuildable)
//! - a durable, versioned `PoolCacheState` holding the active claims
//! - one `ClaimStateStore` that serializes every mutation of that state and
//!   writes it back with a compare-and-swap
//!
//! `TokenSelectionDelegatedProcessor` is the entry point: it converts a
//! request, routes it to its pool's store, and maps the commit outcome to a
//! response, a transient error (retry) or a platform error.

pub mod backoff;
pub mod cache;
pub mod claim_store;
pub mod handlers;
pub mod manager;
pub mod processor;
pub mod wire;

pub use backoff::BackoffManager;
pub use cache::{FilteredTokens, TokenCache, TokenCacheRegistry};
pub use claim_store::{
    ClaimStateStore, ClaimStateStoreCache, PendingRequest, StateTransform, TransformFuture,
};
pub use handlers::{
    BalanceQueryHandler, ClaimQueryHandler, ClaimReleaseHandler, LedgerChangeHandler,
    TokenEventHandler,
};
pub use manager::TokenPoolCacheManager;
pub use processor::{ProcessOutcome, TokenSelectionDelegatedProcessor};
pub use wire::{
    ErrorKind, WireError, WireEvent, WireOutcome, WirePayload, WireRequest, WireResponse,
    WireToken,
};
