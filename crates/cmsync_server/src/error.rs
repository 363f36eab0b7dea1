//! Error types for the reference server.

use cmsync_protocol::{ApiResponse, EntityKind};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the reference server reports to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// No record with the id exists.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Collection searched.
        kind: EntityKind,
        /// Requested id.
        id: String,
    },

    /// The input does not form a valid record.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server is switched off.
    #[error("server unavailable")]
    Unavailable,
}

impl ServerError {
    /// HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::NotFound { .. } => 404,
            ServerError::Validation(_) => 422,
            ServerError::Unavailable => 503,
        }
    }
}

/// Wraps a server result in the CRUD response envelope.
pub fn respond<T>(result: ServerResult<T>) -> ApiResponse<T> {
    match result {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => ApiResponse::failure(e.status(), e.to_string()),
    }
}
