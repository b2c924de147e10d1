//! Per-pool refill cooldown.
//!
//! A pool whose ledger cannot satisfy a claim should not page the ledger on
//! every retry. After a page-in that still leaves a claim short, the pool is
//! put in backoff for a fixed cooldown. State is in memory only and resets
//! on restart.

use std::sync::Arc;
use std::time::Duration;

use coinpool_core::{Clock, Timestamp, TokenPoolKey};
use dashmap::DashMap;

#[derive(Debug)]
pub struct BackoffManager {
    cooldown: chrono::Duration,
    clock: Arc<dyn Clock>,
    last_attempt: DashMap<TokenPoolKey, Timestamp>,
}

impl BackoffManager {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX),
            clock,
            last_attempt: DashMap::new(),
        }
    }

    /// Record that a refill for `pool_key` still could not satisfy a claim.
    pub fn update(&self, pool_key: &TokenPoolKey) {
        let now = self.clock.now();
        self.last_attempt.insert(pool_key.clone(), now);
        tracing::debug!(pool = %pool_key, cooldown_ms = self.cooldown.num_milliseconds(), "refill backoff engaged");
    }

    /// True while the cooldown since the last `update` has not elapsed.
    pub fn backoff(&self, pool_key: &TokenPoolKey) -> bool {
        let now = self.clock.now();
        let active = match self.last_attempt.get(pool_key) {
            Some(since) => self.in_cooldown(*since, now),
            None => return false,
        };
        if !active {
            self.last_attempt
                .remove_if(pool_key, |_, since| !self.in_cooldown(*since, now));
        }
        active
    }

    /// Lift the cooldown early, e.g. because new tokens arrived.
    pub fn clear(&self, pool_key: &TokenPoolKey) {
        if self.last_attempt.remove(pool_key).is_some() {
            tracing::debug!(pool = %pool_key, "refill backoff cleared");
        }
    }

    fn in_cooldown(&self, since: Timestamp, now: Timestamp) -> bool {
        match since.checked_add_signed(self.cooldown) {
            Some(until) => now < until,
            None => true,
        }
    }
}
