//! # cmsync Testkit
//!
//! Test utilities for cmsync.
//!
//! This crate provides:
//! - Sample records, collections and snapshot blobs
//! - A file store in a temporary directory
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cmsync_testkit::prelude::*;
//!
//! let blob = snapshot_blob(sample_collections(2));
//! let temp = TempStore::new();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
