//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The key cannot be stored by this backend.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A stored value is not valid UTF-8.
    #[error("value for key {0:?} is not valid UTF-8")]
    InvalidUtf8(String),

    /// Another process holds the store directory.
    #[error("store directory is locked by another process")]
    Locked,

    /// The backend refuses further operations.
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
}
