//! Error types for coinpool operations

use crate::{TokenEventKind, TokenPoolKey};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for pool {pool}: {reason}")]
    Serialization { pool: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors raised while converting or checking requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("Invalid tag regex '{pattern}': {reason}")]
    InvalidTagRegex { pattern: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors raised while routing an event to its handler or running it on the
/// per-pool worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No handler registered for event kind {kind}")]
    NoHandler { kind: TokenEventKind },

    #[error("Event for pool {got} routed to store for pool {expected}")]
    PoolMismatch {
        expected: TokenPoolKey,
        got: TokenPoolKey,
    },

    #[error("Transform panicked: {message}")]
    TransformPanicked { message: String },

    #[error("Worker for pool {pool} dropped the request")]
    WorkerGone { pool: TokenPoolKey },
}

/// Errors from the ledger-side token service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Token service failed for pool {pool}: {reason}")]
    TokenService { pool: TokenPoolKey, reason: String },
}

/// Master error type for all coinpool errors.
#[derive(Debug, Clone, Error)]
pub enum CoinPoolError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),
}

impl CoinPoolError {
    /// Stable error-type name carried in platform error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            CoinPoolError::Storage(StorageError::TransactionFailed { .. }) => "StorageTransactionFailed",
            CoinPoolError::Storage(StorageError::Serialization { .. }) => "StorageSerialization",
            CoinPoolError::Storage(StorageError::LockPoisoned) => "StorageLockPoisoned",
            CoinPoolError::Validation(_) => "ValidationError",
            CoinPoolError::Config(_) => "ConfigError",
            CoinPoolError::Dispatch(DispatchError::NoHandler { .. }) => "NoHandlerRegistered",
            CoinPoolError::Dispatch(DispatchError::PoolMismatch { .. }) => "PoolMismatch",
            CoinPoolError::Dispatch(DispatchError::TransformPanicked { .. }) => "TransformPanicked",
            CoinPoolError::Dispatch(DispatchError::WorkerGone { .. }) => "WorkerGone",
            CoinPoolError::Selection(_) => "TokenServiceError",
        }
    }
}

/// Result type alias for coinpool operations.
pub type CoinPoolResult<T> = Result<T, CoinPoolError>;

// =============================================================================
// TESTS
// =============================================================================
