//! Internal token events and the responses their handlers produce.
//!
//! Events here are already validated: amounts are parsed, tag patterns are
//! compiled. Conversion from the wire representation lives in
//! `coinpool-selection::wire`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CachedToken, ClaimId, StateRef, TokenAmount, TokenPoolKey, ValidationError};

// ============================================================================
// FILTER
// ============================================================================

/// Owner-hash / tag filter applied to cached tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    pub owner_hash: Option<String>,
    pub tag_regex: Option<Regex>,
}

impl TokenFilter {
    /// Filter that matches every token.
    pub fn any() -> Self {
        Self::default()
    }

    /// Build a filter, compiling the tag pattern if one is given.
    pub fn new(
        owner_hash: Option<String>,
        tag_pattern: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let tag_regex = tag_pattern
            .map(|p| {
                Regex::new(p).map_err(|e| ValidationError::InvalidTagRegex {
                    pattern: p.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            owner_hash,
            tag_regex,
        })
    }

    pub fn is_unfiltered(&self) -> bool {
        self.owner_hash.is_none() && self.tag_regex.is_none()
    }

    pub fn tag_pattern(&self) -> Option<&str> {
        self.tag_regex.as_ref().map(|r| r.as_str())
    }

    /// Owner hash must be equal when set; the tag must match when a pattern
    /// is set, so an untagged token never matches a tag filter.
    pub fn matches(&self, token: &CachedToken) -> bool {
        if let Some(owner) = &self.owner_hash {
            if token.owner_hash.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        match (&self.tag_regex, &token.tag) {
            (None, _) => true,
            (Some(regex), Some(tag)) => regex.is_match(tag),
            (Some(_), None) => false,
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Discriminant used to register and look up event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenEventKind {
    ClaimQuery,
    ClaimRelease,
    LedgerChange,
    BalanceQuery,
}

impl TokenEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEventKind::ClaimQuery => "ClaimQuery",
            TokenEventKind::ClaimRelease => "ClaimRelease",
            TokenEventKind::LedgerChange => "LedgerChange",
            TokenEventKind::BalanceQuery => "BalanceQuery",
        }
    }
}

impl fmt::Display for TokenEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to reserve tokens summing to at least `target_amount`.
#[derive(Debug, Clone)]
pub struct ClaimQuery {
    pub request_id: String,
    pub pool_key: TokenPoolKey,
    pub filter: TokenFilter,
    pub target_amount: TokenAmount,
}

/// Release of a claim. Spent tokens leave the cache through `LedgerChange`.
#[derive(Debug, Clone)]
pub struct ClaimRelease {
    pub pool_key: TokenPoolKey,
    pub claim_id: ClaimId,
}

/// Tokens produced and consumed by a committed ledger transaction.
#[derive(Debug, Clone)]
pub struct LedgerChange {
    pub pool_key: TokenPoolKey,
    pub produced: Vec<CachedToken>,
    pub consumed: Vec<StateRef>,
}

#[derive(Debug, Clone)]
pub struct BalanceQuery {
    pub pool_key: TokenPoolKey,
    pub filter: TokenFilter,
}

#[derive(Debug, Clone)]
pub enum TokenEvent {
    ClaimQuery(ClaimQuery),
    ClaimRelease(ClaimRelease),
    LedgerChange(LedgerChange),
    BalanceQuery(BalanceQuery),
}

impl TokenEvent {
    pub fn kind(&self) -> TokenEventKind {
        match self {
            TokenEvent::ClaimQuery(_) => TokenEventKind::ClaimQuery,
            TokenEvent::ClaimRelease(_) => TokenEventKind::ClaimRelease,
            TokenEvent::LedgerChange(_) => TokenEventKind::LedgerChange,
            TokenEvent::BalanceQuery(_) => TokenEventKind::BalanceQuery,
        }
    }

    pub fn pool_key(&self) -> &TokenPoolKey {
        match self {
            TokenEvent::ClaimQuery(e) => &e.pool_key,
            TokenEvent::ClaimRelease(e) => &e.pool_key,
            TokenEvent::LedgerChange(e) => &e.pool_key,
            TokenEvent::BalanceQuery(e) => &e.pool_key,
        }
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimQueryResponse {
    pub pool_key: TokenPoolKey,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<ClaimId>,
    #[serde(default)]
    pub selected_refs: Vec<StateRef>,
    pub selected_amount: TokenAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClaimQueryResponse {
    pub fn granted(
        pool_key: TokenPoolKey,
        claim_id: ClaimId,
        selected: &[CachedToken],
    ) -> Self {
        Self {
            pool_key,
            granted: true,
            claim_id: Some(claim_id),
            selected_refs: selected.iter().map(|t| t.state_ref.clone()).collect(),
            selected_amount: selected.iter().map(|t| &t.amount).sum(),
            reason: None,
        }
    }

    pub fn rejected(pool_key: TokenPoolKey, reason: impl Into<String>) -> Self {
        Self {
            pool_key,
            granted: false,
            claim_id: None,
            selected_refs: Vec::new(),
            selected_amount: TokenAmount::zero(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReleaseAck {
    pub pool_key: TokenPoolKey,
    pub claim_id: ClaimId,
    /// False when the claim was already gone (released twice, expired, or unknown).
    pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceQueryResponse {
    pub pool_key: TokenPoolKey,
    pub available_balance: TokenAmount,
    pub total_balance: TokenAmount,
}

/// Response produced by an event handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TokenResponse {
    ClaimQueryResponse(ClaimQueryResponse),
    ClaimReleaseAck(ClaimReleaseAck),
    BalanceQueryResponse(BalanceQueryResponse),
}
