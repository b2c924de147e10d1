//! coinpool Storage Layer
//!
//! Durable, versioned storage of per-pool claim state and the read side of
//! the ledger that the selection cache pages tokens from.
//!
//! - `PoolStateStore`: load + conditional (compare-and-swap) update
//! - `AvailableTokenService`: page unspent tokens, query aggregate balance
//! - `InMemoryPoolStateStore` / `LmdbPoolStateStore`: store backends
//! - `InMemoryLedgerTokens`: in-process ledger view

pub mod lmdb_backend;
pub mod memory;
pub mod pool_key;
pub mod traits;

pub use lmdb_backend::{LmdbPoolStateStore, LmdbStoreError};
pub use memory::{InMemoryLedgerTokens, InMemoryPoolStateStore};
pub use pool_key::EncodedPoolKey;
pub use traits::{AvailableTokenService, PoolStateStore, UpdateOutcome};
