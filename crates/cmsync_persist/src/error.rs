//! Error types for local persistence.
//!
//! These errors stay inside the crate's public operations: the
//! [`crate::LocalPersistence`] methods log and swallow them. They are
//! public for the lower-level [`crate::BackupRing`] API and the CLI.

use cmsync_storage::StorageError;
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors that can occur while reading or writing local state.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A backup key does not carry a parseable timestamp.
    #[error("invalid backup name: {0}")]
    InvalidBackupName(String),

    /// No free backup name was found for a timestamp.
    #[error("backup name collision at {0}")]
    NameCollision(String),
}
