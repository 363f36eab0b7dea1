//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that make a snapshot blob unusable as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode the snapshot.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The blob is not valid JSON.
    #[error("invalid JSON: {message}")]
    InvalidJson {
        /// Parser message.
        message: String,
    },

    /// The JSON does not have the snapshot envelope shape.
    #[error("invalid snapshot envelope: {message}")]
    InvalidEnvelope {
        /// Description of the structural error.
        message: String,
    },

    /// The snapshot was written by a newer data format.
    #[error("unsupported snapshot format version {found} (newest supported is {supported})")]
    UnsupportedVersion {
        /// Version found in the blob.
        found: u64,
        /// Newest version this build reads.
        supported: u32,
    },
}

impl CodecError {
    pub(crate) fn envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }
}
