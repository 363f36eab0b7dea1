//! CLI command implementations.

pub mod backups;
pub mod inspect;
pub mod maintenance;

use cmsync_codec::CURRENT_FORMAT_VERSION;
use cmsync_persist::{LocalPersistence, PersistConfig};
use cmsync_storage::{FileStore, KeyValueStore, StorageError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// No store exists at the path.
    #[error("no store found at {0}")]
    NoStore(String),

    /// The store could not be opened.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The named backup does not exist.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// A destructive command was run without confirmation.
    #[error("refusing to {0} without --yes")]
    Unconfirmed(&'static str),
}

/// Opens the persistence manager over the store at `path`.
///
/// Records are stamped with the snapshot format this build writes.
pub fn open(path: &Path, namespace: &str) -> Result<LocalPersistence, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoStore(path.display().to_string()));
    }
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(path)?);
    let config = PersistConfig::default()
        .with_namespace(namespace)
        .with_data_format_version(CURRENT_FORMAT_VERSION);
    Ok(LocalPersistence::new(store, config))
}

/// Returns true if `format` selects JSON output.
fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
