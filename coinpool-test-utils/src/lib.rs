//! coinpool Test Utilities
//!
//! Shared test infrastructure for the coinpool workspace:
//! - Proptest generators for pools, tokens and event sequences
//! - Test fixtures for common scenarios
//! - Assertions on `CoinPoolError` variants

// Re-export the in-memory backends from their source crate
pub use coinpool_storage::{InMemoryLedgerTokens, InMemoryPoolStateStore};

// Re-export core types for convenience
pub use coinpool_core::{
    CachedToken, ClaimId, CoinPoolConfig, CoinPoolError, CoinPoolResult, CommitMode,
    DispatchError, ManualClock, PoolCacheState, StateRef, StorageError, Timestamp, TokenAmount,
    TokenClaim, TokenPoolKey, ValidationError,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for coinpool types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a pool key from a small alphabet so collisions happen.
    pub fn arb_pool_key() -> impl Strategy<Value = TokenPoolKey> {
        (
            prop::sample::select(vec!["alice", "bob"]),
            prop::sample::select(vec!["cash", "bond"]),
            "[0-9a-f]{8}",
            prop::sample::select(vec!["USD", "EUR", "GBP"]),
        )
            .prop_map(|(holder, token_type, issuer, symbol)| {
                TokenPoolKey::new(holder, token_type, issuer, symbol)
            })
    }

    /// Generate a positive token amount.
    pub fn arb_amount() -> impl Strategy<Value = TokenAmount> {
        (1u64..=1_000).prop_map(TokenAmount::from)
    }

    /// Generate an optional owner hash from two owners.
    pub fn arb_owner() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop::sample::select(vec!["owner-1", "owner-2"]).prop_map(String::from))
    }

    /// Generate an optional tag, some of which match `^vip-`.
    pub fn arb_tag() -> impl Strategy<Value = Option<String>> {
        prop::option::of(
            prop::sample::select(vec!["vip-gold", "vip-silver", "standard"]).prop_map(String::from),
        )
    }

    /// Generate between 1 and `max_len` tokens with unique state refs.
    pub fn arb_pool_tokens(max_len: usize) -> impl Strategy<Value = Vec<CachedToken>> {
        prop::collection::vec((1u64..=100, arb_owner(), arb_tag()), 1..=max_len.max(1)).prop_map(
            |specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (amount, owner, tag))| {
                        let mut token = CachedToken::new(format!("tx-{}:0", i), amount);
                        token.owner_hash = owner;
                        token.tag = tag;
                        token
                    })
                    .collect()
            },
        )
    }

    /// One step of a generated workload against a single pool.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PoolOp {
        /// Claim at least this much.
        Claim { target: u64 },
        /// Release the n-th (modulo live count) granted claim.
        Release { nth: usize },
        /// Release a claim id nobody holds.
        ReleaseUnknown,
        /// Move the clock forward by this many seconds.
        Advance { secs: i64 },
        Balance,
    }

    /// Generate a workload of claims, releases, clock moves and balance checks.
    pub fn arb_pool_ops(max_len: usize) -> impl Strategy<Value = Vec<PoolOp>> {
        let op = prop_oneof![
            4 => (1u64..=150).prop_map(|target| PoolOp::Claim { target }),
            2 => any::<usize>().prop_map(|nth| PoolOp::Release { nth }),
            1 => Just(PoolOp::ReleaseUnknown),
            1 => (1i64..=400).prop_map(|secs| PoolOp::Advance { secs }),
            2 => Just(PoolOp::Balance),
        ];
        prop::collection::vec(op, 1..=max_len.max(1))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    /// The pool most tests run against.
    pub fn pool_key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    /// A second pool, for isolation tests.
    pub fn other_pool_key() -> TokenPoolKey {
        TokenPoolKey::new("bob", "cash", "issuer-1", "USD")
    }

    /// Untagged, unowned tokens with refs `tx-0:0`, `tx-1:0`, ...
    pub fn tokens(amounts: &[u64]) -> Vec<CachedToken> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| CachedToken::new(format!("tx-{}:0", i), *amount))
            .collect()
    }

    /// Three tokens of 5.
    pub fn five_five_five() -> Vec<CachedToken> {
        tokens(&[5, 5, 5])
    }

    /// A ledger holding `tokens` for `pool`.
    pub fn ledger_with(pool: &TokenPoolKey, tokens: Vec<CachedToken>) -> Arc<InMemoryLedgerTokens> {
        let ledger = Arc::new(InMemoryLedgerTokens::new());
        ledger
            .insert_tokens(pool, tokens)
            .expect("seeding an in-memory ledger should succeed");
        ledger
    }

    /// A claim over `tokens` created now and expiring after `ttl`.
    pub fn claim_of(tokens: Vec<CachedToken>, ttl: Duration) -> TokenClaim {
        let now = Utc::now();
        TokenClaim {
            claim_id: ClaimId::now_v7(),
            request_id: None,
            claimed_tokens: tokens,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Config with short, test-friendly timings.
    pub fn test_config() -> CoinPoolConfig {
        CoinPoolConfig::default()
            .with_claim_expiry(std::time::Duration::from_secs(60))
            .with_backoff_cooldown(std::time::Duration::from_millis(500))
            .with_refill_page_size(100)
    }

    /// A manual clock starting at the current wall-clock time.
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_now())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on coinpool error variants.

    use super::*;

    /// Assert that a result is Ok.
    pub fn assert_ok<T: std::fmt::Debug>(result: &CoinPoolResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);
    }

    /// Assert that a result is a storage error.
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &CoinPoolResult<T>) {
        assert!(
            matches!(result, Err(CoinPoolError::Storage(_))),
            "Expected Storage error, got {:?}",
            result
        );
    }

    /// Assert that a result is a validation error.
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &CoinPoolResult<T>) {
        assert!(
            matches!(result, Err(CoinPoolError::Validation(_))),
            "Expected Validation error, got {:?}",
            result
        );
    }

    /// Assert that a transform panicked and only its own request failed.
    pub fn assert_transform_panicked<T: std::fmt::Debug>(result: &CoinPoolResult<T>) {
        assert!(
            matches!(
                result,
                Err(CoinPoolError::Dispatch(DispatchError::TransformPanicked { .. }))
            ),
            "Expected TransformPanicked, got {:?}",
            result
        );
    }
}
