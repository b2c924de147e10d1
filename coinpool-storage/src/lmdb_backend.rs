//! LMDB-backed claim state store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist one versioned
//! `PoolCacheState` per pool.
//!
//! # Value Format
//!
//! `[version: u64 LE][json PoolCacheState]`
//!
//! # Conditional Writes
//!
//! `update` reads the stored version and writes the new value inside one
//! write transaction. LMDB allows a single writer per environment, so the
//! compare and the write cannot interleave with another process's update.

use std::path::Path;

use async_trait::async_trait;
use coinpool_core::{
    CoinPoolResult, PoolCacheState, StorageError, StoredPoolClaimState, TokenPoolKey,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use tracing::debug;

use crate::pool_key::EncodedPoolKey;
use crate::traits::{PoolStateStore, UpdateOutcome};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("Serialization error for pool {pool}: {reason}")]
    Serialization { pool: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for coinpool_core::CoinPoolError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Serialization { pool, reason } => {
                coinpool_core::CoinPoolError::Storage(StorageError::Serialization { pool, reason })
            }
            other => coinpool_core::CoinPoolError::Storage(StorageError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

/// Versioned claim state persisted in LMDB.
///
/// # Example
///
/// ```ignore
/// use coinpool_storage::{LmdbPoolStateStore, PoolStateStore};
///
/// let store = LmdbPoolStateStore::new("/var/lib/coinpool", 256)?;
/// let stored = store.load(&pool_key).await?;
/// let outcome = store.update(&pool_key, &next_state, stored.db_version).await?;
/// ```
pub struct LmdbPoolStateStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbPoolStateStore {
    /// Open (creating if needed) the store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB claim state store");
        Ok(Self { env, db })
    }

    /// Every pool of one holder that has been written, in key order.
    pub fn pools_for_holder(&self, holder_id: &str) -> Result<Vec<TokenPoolKey>, LmdbStoreError> {
        let prefix = EncodedPoolKey::holder_prefix(holder_id);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut pools = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            if let Some(pool) = EncodedPoolKey::decode(key) {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    /// Number of pools stored.
    pub fn pool_count(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    fn read_stored(
        &self,
        txn: &RoTxn,
        key: &TokenPoolKey,
        encoded: &EncodedPoolKey,
    ) -> Result<StoredPoolClaimState, LmdbStoreError> {
        let bytes = self
            .db
            .get(txn, encoded.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match bytes {
            Some(bytes) => decode_value(key, bytes),
            None => Ok(StoredPoolClaimState::initial(key.clone())),
        }
    }
}

fn decode_value(key: &TokenPoolKey, bytes: &[u8]) -> Result<StoredPoolClaimState, LmdbStoreError> {
    if bytes.len() < 8 {
        return Err(LmdbStoreError::Serialization {
            pool: key.to_string(),
            reason: format!("value is {} bytes, shorter than the version header", bytes.len()),
        });
    }

    let (version_bytes, json) = bytes.split_at(8);
    let version_bytes: [u8; 8] =
        version_bytes
            .try_into()
            .map_err(|_| LmdbStoreError::Serialization {
                pool: key.to_string(),
                reason: "invalid version header".to_string(),
            })?;

    let pool_state: PoolCacheState =
        serde_json::from_slice(json).map_err(|e| LmdbStoreError::Serialization {
            pool: key.to_string(),
            reason: e.to_string(),
        })?;

    Ok(StoredPoolClaimState {
        db_version: u64::from_le_bytes(version_bytes),
        key: key.clone(),
        pool_state,
    })
}

fn encode_value(
    key: &TokenPoolKey,
    version: u64,
    state: &PoolCacheState,
) -> Result<Vec<u8>, LmdbStoreError> {
    let json = serde_json::to_vec(state).map_err(|e| LmdbStoreError::Serialization {
        pool: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(8 + json.len());
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

#[async_trait]
impl PoolStateStore for LmdbPoolStateStore {
    async fn load(&self, key: &TokenPoolKey) -> CoinPoolResult<StoredPoolClaimState> {
        let encoded = EncodedPoolKey::new(key);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        Ok(self.read_stored(&rtxn, key, &encoded)?)
    }

    async fn update(
        &self,
        key: &TokenPoolKey,
        new_state: &PoolCacheState,
        expected_version: u64,
    ) -> CoinPoolResult<UpdateOutcome> {
        let encoded = EncodedPoolKey::new(key);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let current = self.read_stored(&wtxn, key, &encoded)?;
        if current.db_version != expected_version {
            // Dropping the write txn aborts it.
            return Ok(UpdateOutcome::Conflict { actual: current });
        }

        let new_version = expected_version + 1;
        let value = encode_value(key, new_version, new_state)?;

        self.db
            .put(&mut wtxn, encoded.as_bytes(), &value)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(UpdateOutcome::Success { new_version })
    }
}
