//! coinpool Core - Data Types
//!
//! Pool keys, tokens, claims, events, errors and configuration shared by
//! every coinpool crate. This crate holds data and data invariants only;
//! selection, storage and coordination live in the other crates.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod identity;
pub mod pool;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoinPoolConfig, CommitMode};
pub use error::{
    CoinPoolError, CoinPoolResult, ConfigError, DispatchError, SelectionError, StorageError,
    ValidationError,
};
pub use event::{
    BalanceQuery, BalanceQueryResponse, ClaimQuery, ClaimQueryResponse, ClaimRelease,
    ClaimReleaseAck, LedgerChange, TokenEvent, TokenEventKind, TokenFilter, TokenResponse,
};
pub use identity::{ClaimId, StateRef, Timestamp, TokenAmount};
pub use pool::{CachedToken, PoolCacheState, StoredPoolClaimState, TokenClaim, TokenPoolKey};
