//! # cmsync Storage
//!
//! Key/value storage backends for cmsync local persistence.
//!
//! Backends are **opaque string stores**: they do not interpret the values
//! they hold. Snapshot, config and metrics formats belong to the layers
//! above.
//!
//! ## Design Principles
//!
//! - String keys, string values, four operations (get, set, delete, list)
//! - No transactions; a single `set` is atomic, nothing larger is
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral clients
//! - [`FileStore`] - One file per key in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use cmsync_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.set("cmsync.config", "{}").unwrap();
//! assert_eq!(store.get("cmsync.config").unwrap().as_deref(), Some("{}"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::KeyValueStore;
