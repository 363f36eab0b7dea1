//! # cmsync Persist
//!
//! Local persistence for cmsync clients.
//!
//! This crate provides:
//! - [`LocalPersistence`] - owner of the current snapshot slot, the config
//!   record, the metrics record and the backup ring
//! - [`BackupRing`] - bounded, timestamp-ordered backup store with FIFO
//!   eviction
//! - [`AppConfig`] - the persisted configuration record and its explicit
//!   field-by-field defaulting
//! - [`AppMetrics`] - additive process metrics
//!
//! ## Failure semantics
//!
//! Persistence is best-effort. Storage errors are logged and swallowed at
//! the [`LocalPersistence`] boundary; none of its operations can abort a
//! client boot.
//!
//! ## Key layout
//!
//! ```text
//! cmsync.snapshot.current     current snapshot blob
//! cmsync.config               config record
//! cmsync.metrics              metrics record
//! cmsync.format_version       data-format marker written by legacy purge
//! cmsync.backup.<timestamp>   backup ring entries
//! cmsync.corrupt.<timestamp>  archived unparseable snapshots
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod clock;
mod config;
mod error;
mod keys;
mod manager;
mod metrics;

pub use backup::{BackupEntry, BackupRing, DEFAULT_BACKUP_CAPACITY};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigMerge, Theme};
pub use error::{PersistError, PersistResult};
pub use keys::{normalize_timestamp, parse_normalized_timestamp, KeyLayout};
pub use manager::{LocalPersistence, PersistConfig, LEGACY_KEY_PREFIXES};
pub use metrics::{AppMetrics, IssueRecord, MetricsUpdate, MAX_RECENT_ISSUES};
