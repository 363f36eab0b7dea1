//! Snapshot type and encoder.

use crate::error::{CodecError, CodecResult};
use chrono::Utc;
use cmsync_protocol::{Collections, Timestamp};
use serde::Serialize;

/// Current data-format version written into every snapshot.
///
/// Older versions are still readable; version 1 snapshots carry no
/// `created_at`.
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// A point-in-time copy of the replicated collections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Data-format version tag.
    pub format_version: u32,
    /// When the snapshot was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// The collections.
    pub collections: Collections,
}

impl Snapshot {
    /// Creates a snapshot of `collections` stamped with the current time.
    pub fn new(collections: Collections) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            created_at: Some(Utc::now()),
            collections,
        }
    }
}

/// Encodes a snapshot to its JSON text blob.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(snapshot: &Snapshot) -> CodecResult<String> {
    serde_json::to_string(snapshot).map_err(|e| CodecError::EncodingFailed {
        message: e.to_string(),
    })
}
