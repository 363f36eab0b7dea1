//! Responses from the authoritative CRUD source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope returned by every CRUD call.
///
/// A response is either `success` with `data`, or a failure with an
/// `error` message. `status` mirrors the HTTP status when the transport
/// has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// HTTP-style status code.
    #[serde(default)]
    pub status: Option<u16>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status: Some(200),
        }
    }

    /// Creates a server-side failure (5xx class).
    pub fn error(message: impl Into<String>) -> Self {
        Self::failure(500, message)
    }

    /// Creates a rejection of malformed input (4xx class).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::failure(422, message)
    }

    /// Creates a not-found response.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::failure(404, message)
    }

    /// Creates a failure with an explicit status.
    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            status: Some(status),
        }
    }

    /// Returns true if the source rejected the request's input.
    pub fn is_rejection(&self) -> bool {
        !self.success && matches!(self.status, Some(400..=499))
    }

    /// Converts into the payload, or a failure describing why there is none.
    pub fn into_result(self) -> Result<T, ApiFailure> {
        let rejected = self.is_rejection();
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ApiFailure {
                message: "response has no payload".into(),
                rejected: false,
            }),
            (false, _) => Err(ApiFailure {
                message: self
                    .error
                    .unwrap_or_else(|| "request failed without a message".into()),
                rejected,
            }),
        }
    }
}

/// Why a CRUD call did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    /// Message reported by the source.
    pub message: String,
    /// True when the source rejected the input rather than failing.
    pub rejected: bool,
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
