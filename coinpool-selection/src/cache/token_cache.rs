//! Insertion-ordered cache of one pool's unspent tokens.

use std::collections::{HashMap, HashSet, VecDeque};

use coinpool_core::{CachedToken, PoolCacheState, StateRef, TokenAmount, TokenFilter, TokenPoolKey};

use super::filter::{self, FilteredTokens};

/// Compaction only kicks in above this many slots.
const MIN_COMPACT_SLOTS: usize = 64;

/// Unspent tokens of one pool.
///
/// Tokens live in a slot vector so iteration follows insertion order; a
/// ref → slot index makes add, lookup and remove O(1). Removal leaves a hole
/// that is compacted away once holes outnumber live tokens.
///
/// Refs removed as consumed are remembered (up to `max_tombstones`, oldest
/// forgotten first) and refused by `add`, so a lagging ledger page or a
/// durable claim cannot bring a spent token back.
///
/// `is_complete` is set once an unfiltered page came back short: every
/// unspent ledger token has been seen, and from then on only ledger changes
/// move the cached supply.
///
/// No internal locking: the owning `ClaimStateStore` drain loop is the only
/// writer.
#[derive(Debug)]
pub struct TokenCache {
    pool_key: TokenPoolKey,
    slots: Vec<Option<CachedToken>>,
    index: HashMap<StateRef, usize>,
    tombstones: HashSet<StateRef>,
    tombstone_order: VecDeque<StateRef>,
    max_tombstones: usize,
    complete: bool,
}

impl TokenCache {
    pub fn new(pool_key: TokenPoolKey, max_tombstones: usize) -> Self {
        Self {
            pool_key,
            slots: Vec::new(),
            index: HashMap::new(),
            tombstones: HashSet::new(),
            tombstone_order: VecDeque::new(),
            max_tombstones,
            complete: false,
        }
    }

    pub fn pool_key(&self) -> &TokenPoolKey {
        &self.pool_key
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, state_ref: &StateRef) -> bool {
        self.index.contains_key(state_ref)
    }

    pub fn get(&self, state_ref: &StateRef) -> Option<&CachedToken> {
        let slot = *self.index.get(state_ref)?;
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Whether the whole unspent ledger of the pool has been paged in.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Whether `state_ref` was removed as consumed and is still remembered.
    pub fn is_tombstoned(&self, state_ref: &StateRef) -> bool {
        self.tombstones.contains(state_ref)
    }

    /// Add a token. Returns false if the ref is already cached or tombstoned.
    pub fn add(&mut self, token: CachedToken) -> bool {
        if self.index.contains_key(&token.state_ref) || self.tombstones.contains(&token.state_ref)
        {
            return false;
        }
        self.index.insert(token.state_ref.clone(), self.slots.len());
        self.slots.push(Some(token));
        true
    }

    /// Insert a token produced by the ledger, replacing the cached token with
    /// the same ref in place. Returns true if the ref was not cached.
    ///
    /// Tombstoned refs are still refused.
    pub fn upsert(&mut self, token: CachedToken) -> bool {
        if let Some(slot) = self.index.get(&token.state_ref).copied() {
            if let Some(cached) = self.slots.get_mut(slot) {
                *cached = Some(token);
            }
            return false;
        }
        self.add(token)
    }

    /// Refs this cache already knows: cached or tombstoned.
    pub fn held_refs(&self) -> HashSet<StateRef> {
        self.index
            .keys()
            .chain(self.tombstones.iter())
            .cloned()
            .collect()
    }

    /// Add every token, returning how many were new.
    pub fn add_all(&mut self, tokens: impl IntoIterator<Item = CachedToken>) -> usize {
        let mut added = 0;
        for token in tokens {
            if self.add(token) {
                added += 1;
            }
        }
        added
    }

    /// Remove a consumed token and tombstone its ref.
    ///
    /// The ref is tombstoned even when it was not cached, so a claim that
    /// still records it is not reseeded.
    pub fn remove(&mut self, state_ref: &StateRef) -> Option<CachedToken> {
        self.tombstone(state_ref);
        let slot = self.index.remove(state_ref)?;
        let removed = self.slots.get_mut(slot).and_then(Option::take);
        self.maybe_compact();
        removed
    }

    /// Re-add tokens recorded in the durable claims that this cache lacks.
    ///
    /// Returns how many tokens were added.
    pub fn reseed(&mut self, state: &PoolCacheState) -> usize {
        let missing: Vec<CachedToken> = state
            .token_claims
            .iter()
            .flat_map(|c| c.claimed_tokens.iter())
            .filter(|t| !self.contains(&t.state_ref) && !self.is_tombstoned(&t.state_ref))
            .cloned()
            .collect();
        self.add_all(missing)
    }

    /// All cached tokens in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.slots.iter(),
        }
    }

    /// Tokens matching `filter`, in insertion order.
    pub fn find<'a>(&'a self, filter: &'a TokenFilter) -> FilteredTokens<'a> {
        filter::find(self, filter)
    }

    /// Sum of every cached token.
    pub fn total(&self) -> TokenAmount {
        self.iter().map(|t| &t.amount).sum()
    }

    fn tombstone(&mut self, state_ref: &StateRef) {
        if self.max_tombstones == 0 || !self.tombstones.insert(state_ref.clone()) {
            return;
        }
        self.tombstone_order.push_back(state_ref.clone());
        while self.tombstone_order.len() > self.max_tombstones {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    fn maybe_compact(&mut self) {
        let holes = self.slots.len() - self.index.len();
        if self.slots.len() < MIN_COMPACT_SLOTS || holes <= self.index.len() {
            return;
        }
        self.slots.retain(Option::is_some);
        for (slot, token) in self.slots.iter().enumerate() {
            if let Some(token) = token {
                self.index.insert(token.state_ref.clone(), slot);
            }
        }
    }
}

/// Iterator over cached tokens in insertion order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    inner: std::slice::Iter<'a, Option<CachedToken>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a CachedToken;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.find_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coinpool_core::{ClaimId, TokenClaim};

    fn key() -> TokenPoolKey {
        TokenPoolKey::new("alice", "cash", "issuer-1", "USD")
    }

    fn cache_with(amounts: &[u64]) -> TokenCache {
        let mut cache = TokenCache::new(key(), 100);
        for (i, amount) in amounts.iter().enumerate() {
            cache.add(CachedToken::new(format!("tx-{}:0", i), *amount));
        }
        cache
    }

    fn refs(cache: &TokenCache) -> Vec<String> {
        cache.iter().map(|t| t.state_ref.to_string()).collect()
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let cache = cache_with(&[3, 1, 2]);
        assert_eq!(refs(&cache), vec!["tx-0:0", "tx-1:0", "tx-2:0"]);
        assert_eq!(cache.total(), TokenAmount::from(6));
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut cache = cache_with(&[5]);
        assert!(!cache.add(CachedToken::new("tx-0:0", 99)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"tx-0:0".into()).unwrap().amount, TokenAmount::from(5));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut cache = cache_with(&[5, 6, 7]);
        assert!(!cache.upsert(CachedToken::new("tx-1:0", 60).with_tag("vip")));
        assert_eq!(cache.len(), 3);
        assert_eq!(refs(&cache), vec!["tx-0:0", "tx-1:0", "tx-2:0"]);
        let replaced = cache.get(&"tx-1:0".into()).unwrap();
        assert_eq!(replaced.amount, TokenAmount::from(60));
        assert_eq!(replaced.tag.as_deref(), Some("vip"));
        assert_eq!(cache.total(), TokenAmount::from(72));

        assert!(cache.upsert(CachedToken::new("tx-3:0", 1)));
        cache.remove(&"tx-0:0".into());
        assert!(!cache.upsert(CachedToken::new("tx-0:0", 5)));
        assert!(!cache.contains(&"tx-0:0".into()));
    }

    #[test]
    fn test_held_refs_covers_cached_and_tombstoned() {
        let mut cache = cache_with(&[5, 6]);
        cache.remove(&"tx-0:0".into());
        cache.remove(&"gone:0".into());
        let held = cache.held_refs();
        assert_eq!(held.len(), 3);
        for r in ["tx-0:0", "tx-1:0", "gone:0"] {
            assert!(held.contains(&StateRef::from(r)));
        }
    }

    #[test]
    fn test_remove_tombstones_ref() {
        let mut cache = cache_with(&[5, 6]);
        let removed = cache.remove(&"tx-0:0".into());
        assert_eq!(removed.unwrap().amount, TokenAmount::from(5));
        assert!(!cache.contains(&"tx-0:0".into()));
        assert!(cache.is_tombstoned(&"tx-0:0".into()));
        assert!(!cache.add(CachedToken::new("tx-0:0", 5)));
        assert_eq!(refs(&cache), vec!["tx-1:0"]);
    }

    #[test]
    fn test_remove_unknown_ref_still_tombstones() {
        let mut cache = cache_with(&[]);
        assert!(cache.remove(&"tx-9:0".into()).is_none());
        assert!(cache.is_tombstoned(&"tx-9:0".into()));
    }

    #[test]
    fn test_tombstones_are_bounded() {
        let mut cache = TokenCache::new(key(), 2);
        for r in ["a:0", "b:0", "c:0"] {
            cache.remove(&r.into());
        }
        assert!(!cache.is_tombstoned(&"a:0".into()));
        assert!(cache.is_tombstoned(&"b:0".into()));
        assert!(cache.is_tombstoned(&"c:0".into()));
    }

    #[test]
    fn test_compaction_keeps_order_and_index() {
        let amounts: Vec<u64> = (1..=200).collect();
        let mut cache = cache_with(&amounts);
        for i in (0..200).filter(|i| i % 3 != 0) {
            cache.remove(&StateRef::new(format!("tx-{}:0", i)));
        }

        let expected: Vec<String> = (0..200)
            .filter(|i| i % 3 == 0)
            .map(|i| format!("tx-{}:0", i))
            .collect();
        assert_eq!(refs(&cache), expected);
        for r in &expected {
            assert_eq!(cache.get(&StateRef::new(r.clone())).unwrap().state_ref.as_str(), r);
        }
        assert!(cache.slots.len() < 200);
    }

    #[test]
    fn test_reseed_skips_tombstoned_refs() {
        let now = Utc::now();
        let mut state = PoolCacheState::new(key());
        state
            .add_claim(TokenClaim {
                claim_id: ClaimId::now_v7(),
                request_id: None,
                claimed_tokens: vec![CachedToken::new("tx-0:0", 5), CachedToken::new("tx-1:0", 5)],
                created_at: now,
                expires_at: now + Duration::minutes(5),
            })
            .unwrap();

        let mut cache = TokenCache::new(key(), 100);
        cache.remove(&"tx-1:0".into());

        assert_eq!(cache.reseed(&state), 1);
        assert!(cache.contains(&"tx-0:0".into()));
        assert!(!cache.contains(&"tx-1:0".into()));
        assert_eq!(cache.reseed(&state), 0);
    }
}
