//! # cmsync Codec
//!
//! Snapshot encoding and decoding for cmsync.
//!
//! A snapshot is the full replica (all five collections) plus a data-format
//! version tag, serialized to a single JSON text blob:
//!
//! ```text
//! {
//!   "format_version": 2,
//!   "created_at": "2026-10-15T08:30:00Z",
//!   "collections": { "products": [...], "templates": [...], ... }
//! }
//! ```
//!
//! ## Decoding rules
//!
//! - An envelope that is not valid JSON, has no `collections` object, holds a
//!   non-array collection, or carries a newer `format_version` is rejected
//!   with a [`CodecError`]
//! - Individual records that fail structural validation are dropped and
//!   counted in the [`DecodeReport`]; they never fail the whole snapshot
//! - Records repeating an earlier id replace the earlier entry
//!
//! ## Usage
//!
//! ```
//! use cmsync_codec::{decode, encode, Snapshot};
//! use cmsync_protocol::Collections;
//!
//! let blob = encode(&Snapshot::new(Collections::new())).unwrap();
//! let decoded = decode(&blob).unwrap();
//! assert!(decoded.snapshot.collections.is_empty());
//! assert!(decoded.report.is_clean());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod error;
mod snapshot;

pub use decoder::{decode, DecodeReport, Decoded, DroppedRecord};
pub use error::{CodecError, CodecResult};
pub use snapshot::{encode, Snapshot, CURRENT_FORMAT_VERSION};
