//! Pool identity, cached tokens, claims and the durable per-pool claim state.
//!
//! `PoolCacheState` is the only record shared between processes. Its claims
//! list is the source of truth for "is this token reserved"; the in-memory
//! token cache kept by each process is a rebuildable view of the ledger.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::{ClaimId, StateRef, Timestamp, TokenAmount, ValidationError};

// ============================================================================
// POOL KEY
// ============================================================================

/// Identity of one fungible-token bucket for one holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenPoolKey {
    pub token_type: String,
    pub issuer_hash: String,
    pub symbol: String,
    pub holder_id: String,
}

impl TokenPoolKey {
    pub fn new(
        holder_id: impl Into<String>,
        token_type: impl Into<String>,
        issuer_hash: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            issuer_hash: issuer_hash.into(),
            symbol: symbol.into(),
            holder_id: holder_id.into(),
        }
    }
}

impl fmt::Display for TokenPoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.holder_id, self.token_type, self.issuer_hash, self.symbol
        )
    }
}

// ============================================================================
// CACHED TOKEN
// ============================================================================

/// One unspent token as seen by the selection cache.
///
/// Tokens are replaced wholesale when the ledger changes; they are never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub state_ref: StateRef,
    pub amount: TokenAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl CachedToken {
    pub fn new(state_ref: impl Into<StateRef>, amount: impl Into<TokenAmount>) -> Self {
        Self {
            state_ref: state_ref.into(),
            amount: amount.into(),
            owner_hash: None,
            tag: None,
        }
    }

    pub fn with_owner(mut self, owner_hash: impl Into<String>) -> Self {
        self.owner_hash = Some(owner_hash.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

// ============================================================================
// TOKEN CLAIM
// ============================================================================

/// An active, exclusive reservation of specific tokens.
///
/// The full tokens are recorded (not just their refs) so a process with a
/// cold cache can reseed it from the durable claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaim {
    pub claim_id: ClaimId,
    /// External request that created the claim; repeated queries with the
    /// same request id get the same claim back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub claimed_tokens: Vec<CachedToken>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl TokenClaim {
    pub fn claimed_state_refs(&self) -> impl Iterator<Item = &StateRef> {
        self.claimed_tokens.iter().map(|t| &t.state_ref)
    }

    pub fn claimed_amount(&self) -> TokenAmount {
        self.claimed_tokens.iter().map(|t| &t.amount).sum()
    }

    /// A claim is expired once `now` reaches its expiry.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    pub fn references(&self, state_ref: &StateRef) -> bool {
        self.claimed_tokens.iter().any(|t| &t.state_ref == state_ref)
    }
}

// ============================================================================
// POOL CACHE STATE
// ============================================================================

/// Durable per-pool record of active claims.
///
/// Invariant: a state ref appears in at most one claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCacheState {
    pub pool_key: TokenPoolKey,
    pub token_claims: Vec<TokenClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

impl PoolCacheState {
    pub fn new(pool_key: TokenPoolKey) -> Self {
        Self {
            pool_key,
            token_claims: Vec::new(),
            last_modified: None,
        }
    }

    pub fn claim(&self, claim_id: &ClaimId) -> Option<&TokenClaim> {
        self.token_claims.iter().find(|c| &c.claim_id == claim_id)
    }

    pub fn claim_for_request(&self, request_id: &str) -> Option<&TokenClaim> {
        self.token_claims
            .iter()
            .find(|c| c.request_id.as_deref() == Some(request_id))
    }

    /// Every state ref withheld by a claim.
    pub fn claimed_refs(&self) -> HashSet<&StateRef> {
        self.token_claims
            .iter()
            .flat_map(|c| c.claimed_state_refs())
            .collect()
    }

    pub fn is_claimed(&self, state_ref: &StateRef) -> bool {
        self.token_claims.iter().any(|c| c.references(state_ref))
    }

    /// Record a new claim, refusing refs that are already claimed.
    pub fn add_claim(&mut self, claim: TokenClaim) -> Result<(), ValidationError> {
        let claimed = self.claimed_refs();
        if let Some(dup) = claim.claimed_state_refs().find(|r| claimed.contains(r)) {
            return Err(ValidationError::InvalidValue {
                field: "claimed_tokens".to_string(),
                reason: format!("state ref {} is already claimed", dup),
            });
        }
        self.last_modified = Some(claim.created_at);
        self.token_claims.push(claim);
        Ok(())
    }

    /// Remove a claim. Unknown ids are a no-op.
    pub fn remove_claim(&mut self, claim_id: &ClaimId) -> Option<TokenClaim> {
        let idx = self
            .token_claims
            .iter()
            .position(|c| &c.claim_id == claim_id)?;
        Some(self.token_claims.remove(idx))
    }

    /// Drop claims whose expiry has passed, returning their ids.
    pub fn remove_expired_claims(&mut self, now: Timestamp) -> Vec<ClaimId> {
        self.remove_claims_where(|c| c.is_expired(now))
    }

    /// Drop claims holding any ref that `is_valid` rejects.
    pub fn remove_invalid_claims<F>(&mut self, is_valid: F) -> Vec<ClaimId>
    where
        F: Fn(&StateRef) -> bool,
    {
        self.remove_claims_where(|c| !c.claimed_state_refs().all(|r| is_valid(r)))
    }

    fn remove_claims_where<F>(&mut self, mut predicate: F) -> Vec<ClaimId>
    where
        F: FnMut(&TokenClaim) -> bool,
    {
        let mut removed = Vec::new();
        self.token_claims.retain(|c| {
            if predicate(c) {
                removed.push(c.claim_id);
                false
            } else {
                true
            }
        });
        removed
    }
}

// ============================================================================
// STORED STATE
// ============================================================================

/// A `PoolCacheState` together with the version last known to be persisted.
///
/// Version 0 means the pool has never been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPoolClaimState {
    pub db_version: u64,
    pub key: TokenPoolKey,
    pub pool_state: PoolCacheState,
}

impl StoredPoolClaimState {
    /// State of a pool that has never been persisted.
    pub fn initial(key: TokenPoolKey) -> Self {
        Self {
            db_version: 0,
            pool_state: PoolCacheState::new(key.clone()),
            key,
        }
    }

    /// The state that results from a successful write of `pool_state`.
    pub fn advance(&self, pool_state: PoolCacheState) -> Self {
        Self {
            db_version: self.db_version + 1,
            key: self.key.clone(),
            pool_state,
        }
    }
}
