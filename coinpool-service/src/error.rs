//! Errors that stop the service.

use coinpool_core::CoinPoolError;
use coinpool_storage::LmdbStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] CoinPoolError),

    #[error("Invalid setting {name}={value}: {reason}")]
    Setting {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to open claim state store: {0}")]
    Store(#[from] LmdbStoreError),

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
