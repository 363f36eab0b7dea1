//! Error types for protocol parsing.

use crate::entity::EntityKind;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A record did not match the schema of its kind.
    #[error("invalid {kind} record: {reason}")]
    InvalidRecord {
        /// Kind the record was parsed as.
        kind: EntityKind,
        /// What was wrong with it.
        reason: String,
    },

    /// An entity kind name was not recognized.
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    /// A change message payload could not be interpreted for its action.
    #[error("invalid change payload: {0}")]
    InvalidPayload(String),
}

impl ProtocolError {
    /// Creates an invalid record error.
    pub fn invalid_record(kind: EntityKind, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind,
            reason: reason.into(),
        }
    }
}
