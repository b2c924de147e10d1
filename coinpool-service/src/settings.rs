//! Service settings from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use coinpool_core::constants::{
    DEFAULT_LMDB_MAX_SIZE_MB, ENV_LMDB_MAX_SIZE_MB, ENV_LMDB_PATH, ENV_STORE,
};
use coinpool_core::CoinPoolConfig;
use coinpool_storage::{InMemoryPoolStateStore, LmdbPoolStateStore, PoolStateStore};

use crate::{ServiceError, ServiceResult};

/// Where claim state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Memory,
    Lmdb { path: PathBuf, max_size_mb: usize },
}

impl StoreSettings {
    /// # Environment Variables
    /// - `COINPOOL_STORE`: `memory` (default) or `lmdb`
    /// - `COINPOOL_LMDB_PATH`: required for `lmdb`
    /// - `COINPOOL_LMDB_MAX_SIZE_MB`: map size (default: 256)
    pub fn from_env() -> ServiceResult<Self> {
        let kind = std::env::var(ENV_STORE).unwrap_or_else(|_| "memory".to_string());
        match kind.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreSettings::Memory),
            "lmdb" => {
                let path = std::env::var(ENV_LMDB_PATH).map_err(|_| ServiceError::Setting {
                    name: ENV_LMDB_PATH,
                    value: String::new(),
                    reason: "required when COINPOOL_STORE=lmdb".to_string(),
                })?;
                let max_size_mb = std::env::var(ENV_LMDB_MAX_SIZE_MB)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB);
                Ok(StoreSettings::Lmdb {
                    path: PathBuf::from(path),
                    max_size_mb,
                })
            }
            other => Err(ServiceError::Setting {
                name: ENV_STORE,
                value: other.to_string(),
                reason: "expected 'memory' or 'lmdb'".to_string(),
            }),
        }
    }

    pub fn open(&self) -> ServiceResult<Arc<dyn PoolStateStore>> {
        match self {
            StoreSettings::Memory => Ok(Arc::new(InMemoryPoolStateStore::new())),
            StoreSettings::Lmdb { path, max_size_mb } => {
                Ok(Arc::new(LmdbPoolStateStore::new(path, *max_size_mb)?))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub coinpool: CoinPoolConfig,
    pub store: StoreSettings,
}

impl ServiceSettings {
    pub fn from_env() -> ServiceResult<Self> {
        Ok(Self {
            coinpool: CoinPoolConfig::from_env()?,
            store: StoreSettings::from_env()?,
        })
    }
}
