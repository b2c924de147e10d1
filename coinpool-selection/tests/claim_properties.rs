//! Property-based tests over generated pools and claim workloads.
//!
//! Each case drives one processor through a random sequence of claims,
//! releases, clock moves and balance checks, tracking which granted claims
//! are still live, and checks after every step that:
//! - no two live claims share a state ref
//! - available balance is total minus the live claims
//! - releasing twice, or releasing an unknown claim, changes nothing
//! - total balance is the ledger's, whatever claims and releases ran

use std::collections::HashSet;

use chrono::Duration;
use coinpool_core::{ClaimId, StateRef, Timestamp, TokenAmount};
use coinpool_test_utils::fixtures;
use coinpool_test_utils::generators::{arb_pool_ops, arb_pool_tokens, PoolOp};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

#[path = "support/harness.rs"]
mod harness;
use harness::Harness;

/// A granted claim as seen from outside.
struct LiveClaim {
    claim_id: ClaimId,
    refs: Vec<StateRef>,
    amount: TokenAmount,
    expires_at: Timestamp,
}

fn runtime() -> Result<tokio::runtime::Runtime, TestCaseError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Live claims never overlap, and available balance accounts for
    /// exactly the live claims.
    #[test]
    fn prop_claims_disjoint_and_accounted(
        tokens in arb_pool_tokens(12),
        ops in arb_pool_ops(40),
    ) {
        let rt = runtime()?;
        rt.block_on(async {
            let h = Harness::new(tokens);
            let expiry = Duration::seconds(60);
            let mut live: Vec<LiveClaim> = Vec::new();

            for (step, op) in ops.into_iter().enumerate() {
                let now = coinpool_core::Clock::now(h.clock.as_ref());
                live.retain(|c| now < c.expires_at);

                match op {
                    PoolOp::Claim { target } => {
                        let response = h.claim(&format!("req-{}", step), target).await;
                        if !response.granted {
                            continue;
                        }
                        prop_assert!(response.selected_amount >= TokenAmount::from(target));

                        let held: HashSet<&StateRef> =
                            live.iter().flat_map(|c| c.refs.iter()).collect();
                        for r in &response.selected_refs {
                            prop_assert!(!held.contains(r), "ref {} claimed twice", r);
                        }
                        let claim_id = response
                            .claim_id
                            .ok_or_else(|| TestCaseError::fail("granted claim without id"))?;
                        live.push(LiveClaim {
                            claim_id,
                            refs: response.selected_refs,
                            amount: response.selected_amount,
                            expires_at: now + expiry,
                        });
                    }
                    PoolOp::Release { nth } => {
                        if live.is_empty() {
                            continue;
                        }
                        let claim = live.remove(nth % live.len());
                        prop_assert!(h.release(claim.claim_id).await.released);

                        let after_first = h.stored().pool_state;
                        prop_assert!(!h.release(claim.claim_id).await.released);
                        prop_assert_eq!(h.stored().pool_state, after_first);
                    }
                    PoolOp::ReleaseUnknown => {
                        // Settle expiry first so only the release could change state.
                        h.balance().await;
                        let before = h.stored().pool_state;
                        prop_assert!(!h.release(ClaimId::now_v7()).await.released);
                        prop_assert_eq!(h.stored().pool_state, before);
                    }
                    PoolOp::Advance { secs } => {
                        h.clock.advance(Duration::seconds(secs));
                    }
                    PoolOp::Balance => {
                        let balance = h.balance().await;
                        let claimed = live
                            .iter()
                            .fold(TokenAmount::zero(), |acc, c| acc + &c.amount);
                        prop_assert_eq!(
                            balance.available_balance,
                            balance.total_balance.saturating_sub(&claimed)
                        );
                        prop_assert!(balance.total_balance >= claimed);
                    }
                }
            }

            let stored: HashSet<ClaimId> = h
                .stored()
                .pool_state
                .token_claims
                .iter()
                .map(|c| c.claim_id)
                .collect();
            let now = coinpool_core::Clock::now(h.clock.as_ref());
            for claim in live.iter().filter(|c| now < c.expires_at) {
                prop_assert!(stored.contains(&claim.claim_id));
            }
            Ok(())
        })?;
    }

    /// Total balance only moves with the ledger: claims and releases leave
    /// it alone, even when the ledger spans many refill pages.
    #[test]
    fn prop_total_balance_conserved(
        tokens in arb_pool_tokens(12),
        ops in arb_pool_ops(30),
        page_size in 1usize..5,
    ) {
        let rt = runtime()?;
        rt.block_on(async {
            let expected: TokenAmount = tokens.iter().map(|t| &t.amount).sum();
            let h = Harness::with_config(
                fixtures::test_config().with_refill_page_size(page_size),
                tokens,
            );

            let mut granted: Vec<ClaimId> = Vec::new();
            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    PoolOp::Claim { target } => {
                        if let Some(id) = h.claim(&format!("req-{}", step), target).await.claim_id {
                            granted.push(id);
                        }
                    }
                    PoolOp::Release { nth } if !granted.is_empty() => {
                        let id = granted.remove(nth % granted.len());
                        h.release(id).await;
                    }
                    PoolOp::Advance { secs } => h.clock.advance(Duration::seconds(secs)),
                    _ => {}
                }
                prop_assert_eq!(&h.balance().await.total_balance, &expected);
            }
            Ok(())
        })?;
    }
}
