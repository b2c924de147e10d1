//! Constants for coinpool
//!
//! Default values for configuration that is normally supplied per deployment.

// ============================================================================
// CLAIMS
// ============================================================================

/// Default lifetime of a token claim before it is reclaimed (5 minutes)
pub const DEFAULT_CLAIM_EXPIRY_SECS: u64 = 300;

// ============================================================================
// CACHE REFILL
// ============================================================================

/// Default number of tokens requested from the ledger per page-in
pub const DEFAULT_REFILL_PAGE_SIZE: usize = 1500;

/// Default cooldown after a page-in that still could not satisfy a claim
pub const DEFAULT_BACKOFF_COOLDOWN_MS: u64 = 2000;

/// Consumed refs remembered per pool so reseeding does not resurrect them
pub const MAX_TOMBSTONES: usize = 10_000;

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_CLAIM_EXPIRY_SECS: &str = "COINPOOL_CLAIM_EXPIRY_SECS";
pub const ENV_REFILL_PAGE_SIZE: &str = "COINPOOL_REFILL_PAGE_SIZE";
pub const ENV_BACKOFF_COOLDOWN_MS: &str = "COINPOOL_BACKOFF_COOLDOWN_MS";
pub const ENV_COMMIT_MODE: &str = "COINPOOL_COMMIT_MODE";

// Service-only settings
pub const ENV_STORE: &str = "COINPOOL_STORE";
pub const ENV_LMDB_PATH: &str = "COINPOOL_LMDB_PATH";
pub const ENV_LMDB_MAX_SIZE_MB: &str = "COINPOOL_LMDB_MAX_SIZE_MB";
pub const ENV_LOG_FORMAT: &str = "COINPOOL_LOG_FORMAT";

/// Default LMDB map size for the claim state store
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;
