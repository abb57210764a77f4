//! Error types for cache and persistence operations.

use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the cache adapter.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted blob could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process holds the storage directory.
    #[error("storage directory is locked by another process")]
    Locked,

    /// The persistence prefix is already used by another client.
    #[error("persistence prefix {0:?} is already in use")]
    DuplicatePrefix(String),

    /// A write did not have the expected shape.
    #[error("invalid cache write: {0}")]
    InvalidWrite(String),

    /// A user-supplied update function failed.
    #[error("update function failed: {0}")]
    Update(String),
}

impl CacheError {
    /// Creates an update-function error.
    pub fn update(message: impl Into<String>) -> Self {
        Self::Update(message.into())
    }
}
