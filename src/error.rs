//! Error types for procledger

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Chain replacement rejected: {0}")]
    ChainReplaceRejected(String),

    #[error("Corrupt chain snapshot: {0}")]
    LoadCorrupt(String),

    #[error("Signing identity {actual} does not match transaction sender {expected}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Mining interrupted")]
    MiningInterrupted,

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
