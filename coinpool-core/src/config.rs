//! Configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_COOLDOWN_MS, DEFAULT_CLAIM_EXPIRY_SECS, DEFAULT_REFILL_PAGE_SIZE,
    ENV_BACKOFF_COOLDOWN_MS, ENV_CLAIM_EXPIRY_SECS, ENV_COMMIT_MODE, ENV_REFILL_PAGE_SIZE,
};
use crate::{CoinPoolResult, ConfigError};

/// How a claim state store writes back queued requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Apply everything queued, then one conditional write per batch.
    Batched,
    /// One conditional write per request.
    PerRequest,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::Batched => "batched",
            CommitMode::PerRequest => "per_request",
        }
    }
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "batched" => Ok(CommitMode::Batched),
            "per_request" | "per-request" => Ok(CommitMode::PerRequest),
            other => Err(ConfigError::InvalidValue {
                field: "commit_mode".to_string(),
                value: other.to_string(),
                reason: "expected 'batched' or 'per_request'".to_string(),
            }),
        }
    }
}

/// Settings for claim expiry, cache refill and write-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPoolConfig {
    /// Lifetime of a claim; after this its tokens return to the pool.
    pub claim_expiry: Duration,
    /// Number of tokens requested from the ledger per page-in.
    pub refill_page_size: usize,
    /// Quiet period after a page-in that still left a claim short.
    pub backoff_cooldown: Duration,
    pub commit_mode: CommitMode,
}

impl Default for CoinPoolConfig {
    fn default() -> Self {
        Self {
            claim_expiry: Duration::from_secs(DEFAULT_CLAIM_EXPIRY_SECS),
            refill_page_size: DEFAULT_REFILL_PAGE_SIZE,
            backoff_cooldown: Duration::from_millis(DEFAULT_BACKOFF_COOLDOWN_MS),
            commit_mode: CommitMode::Batched,
        }
    }
}

impl CoinPoolConfig {
    /// Create CoinPoolConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `COINPOOL_CLAIM_EXPIRY_SECS`: Claim lifetime (default: 300)
    /// - `COINPOOL_REFILL_PAGE_SIZE`: Tokens per page-in (default: 1500)
    /// - `COINPOOL_BACKOFF_COOLDOWN_MS`: Refill cooldown (default: 2000)
    /// - `COINPOOL_COMMIT_MODE`: `batched` or `per_request` (default: batched)
    ///
    /// Unparseable numbers fall back to the default; an unknown commit mode
    /// is an error because silently changing write-back semantics is worse.
    pub fn from_env() -> CoinPoolResult<Self> {
        let claim_expiry = Duration::from_secs(
            std::env::var(ENV_CLAIM_EXPIRY_SECS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CLAIM_EXPIRY_SECS),
        );

        let refill_page_size = std::env::var(ENV_REFILL_PAGE_SIZE)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFILL_PAGE_SIZE);

        let backoff_cooldown = Duration::from_millis(
            std::env::var(ENV_BACKOFF_COOLDOWN_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKOFF_COOLDOWN_MS),
        );

        let commit_mode = match std::env::var(ENV_COMMIT_MODE) {
            Ok(raw) => raw.parse::<CommitMode>()?,
            Err(_) => CommitMode::Batched,
        };

        let config = Self {
            claim_expiry,
            refill_page_size,
            backoff_cooldown,
            commit_mode,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_claim_expiry(mut self, expiry: Duration) -> Self {
        self.claim_expiry = expiry;
        self
    }

    pub fn with_refill_page_size(mut self, page_size: usize) -> Self {
        self.refill_page_size = page_size;
        self
    }

    pub fn with_backoff_cooldown(mut self, cooldown: Duration) -> Self {
        self.backoff_cooldown = cooldown;
        self
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    /// Claim expiry as a chrono duration for timestamp arithmetic.
    pub fn claim_expiry_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_expiry).unwrap_or(chrono::Duration::MAX)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - claim_expiry > 0
    /// - refill_page_size > 0
    pub fn validate(&self) -> CoinPoolResult<()> {
        if self.claim_expiry.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "claim_expiry".to_string(),
                value: format!("{:?}", self.claim_expiry),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        if self.refill_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "refill_page_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
