//! Error types for the sync engine.

use crate::recovery::RecoveryReport;
use cmsync_codec::CodecError;
use cmsync_protocol::ProtocolError;
use cmsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Network or transport error, or a server-side failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The authoritative source rejected the input, or a payload is
    /// malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Recovery could not produce a usable replica.
    #[error(transparent)]
    FatalInit(Box<FatalInitError>),

    /// Not connected to the broadcast hub.
    #[error("not connected")]
    NotConnected,

    /// The operation was cancelled, or its counterpart went away.
    #[error("operation cancelled")]
    Cancelled,

    /// A message named an entity kind this client does not know.
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(e: CodecError) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::UnknownEntityKind(kind) => SyncError::UnknownEntityKind(kind),
            other => SyncError::Validation(other.to_string()),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl From<FatalInitError> for SyncError {
    fn from(e: FatalInitError) -> Self {
        SyncError::FatalInit(Box::new(e))
    }
}

/// Recovery ended in the fatal state.
///
/// Carries the transition trace so the caller can show what was tried.
#[derive(Error, Debug, Clone)]
#[error("fatal initialization error: {cause}")]
pub struct FatalInitError {
    /// What made recovery give up.
    pub cause: String,
    /// Transitions taken before giving up.
    pub report: RecoveryReport,
}

impl FatalInitError {
    /// Creates a fatal error.
    pub fn new(cause: impl Into<String>, report: RecoveryReport) -> Self {
        Self {
            cause: cause.into(),
            report,
        }
    }
}
