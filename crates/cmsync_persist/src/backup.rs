//! Backup ring store.
//!
//! A bounded set of named snapshot blobs. Each name is the ring prefix
//! followed by the normalized creation timestamp, so the stored keys carry
//! their own ordering:
//!
//! ```text
//! cmsync.backup.2026-10-15T08-30-00-000Z
//! cmsync.backup.2026-10-15T08-35-00-000Z
//! cmsync.backup.2026-10-15T08-35-00-000Z-1   # same millisecond, second write
//! ```
//!
//! Entries are write-once. Eviction removes the oldest entries first until
//! the ring is back at capacity.

use crate::error::{PersistError, PersistResult};
use crate::keys::{normalize_timestamp, parse_normalized_timestamp};
use chrono::{DateTime, Utc};
use cmsync_storage::KeyValueStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of backups kept.
pub const DEFAULT_BACKUP_CAPACITY: usize = 10;

/// Upper bound on collision suffixes tried for one timestamp.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Metadata of one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Full storage key.
    pub name: String,
    /// Creation time encoded in the name.
    pub timestamp: DateTime<Utc>,
    /// Collision suffix (0 for the first backup in a millisecond).
    pub sequence: u32,
}

impl BackupEntry {
    fn ordering_key(&self) -> (DateTime<Utc>, u32) {
        (self.timestamp, self.sequence)
    }
}

/// Bounded, timestamp-ordered backup store.
pub struct BackupRing {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    capacity: AtomicUsize,
}

impl BackupRing {
    /// Creates a ring over `store` using keys that start with `prefix`.
    ///
    /// `capacity` is clamped to at least 1.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, capacity: usize) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    /// Maximum number of entries kept after eviction.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Changes the capacity. Takes effect at the next eviction.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::SeqCst);
    }

    /// The key prefix of this ring.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Lists entries, oldest first.
    ///
    /// Keys under the prefix whose suffix is not a normalized timestamp are
    /// not ring entries and are skipped.
    pub fn list(&self) -> PersistResult<Vec<BackupEntry>> {
        let mut entries: Vec<BackupEntry> = self
            .store
            .keys_with_prefix(&self.prefix)?
            .into_iter()
            .filter_map(|name| match self.parse_name(&name) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping foreign key under backup prefix");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.ordering_key());
        Ok(entries)
    }

    /// Number of entries.
    pub fn len(&self) -> PersistResult<usize> {
        Ok(self.list()?.len())
    }

    /// Returns true if the ring holds no entries.
    pub fn is_empty(&self) -> PersistResult<bool> {
        Ok(self.list()?.is_empty())
    }

    /// The newest entry, if any.
    pub fn latest(&self) -> PersistResult<Option<BackupEntry>> {
        Ok(self.list()?.pop())
    }

    /// Reads the blob stored under `name`.
    pub fn get(&self, name: &str) -> PersistResult<Option<String>> {
        if !name.starts_with(&self.prefix) {
            return Err(PersistError::InvalidBackupName(name.to_string()));
        }
        Ok(self.store.get(name)?)
    }

    /// Stores `blob` as a new entry created at `at`.
    ///
    /// Does not evict; call [`BackupRing::evict`] afterwards.
    pub fn insert(&self, at: DateTime<Utc>, blob: &str) -> PersistResult<BackupEntry> {
        let base = format!("{}{}", self.prefix, normalize_timestamp(at));

        for sequence in 0..MAX_COLLISION_SUFFIX {
            let name = if sequence == 0 {
                base.clone()
            } else {
                format!("{base}-{sequence}")
            };
            if self.store.get(&name)?.is_some() {
                continue;
            }

            self.store.set(&name, blob)?;
            let entry = self.parse_name(&name)?;
            tracing::debug!(name = %entry.name, bytes = blob.len(), "backup stored");
            return Ok(entry);
        }

        Err(PersistError::NameCollision(base))
    }

    /// Removes the oldest entries until at most `capacity` remain.
    /// Returns how many were removed.
    pub fn evict(&self) -> PersistResult<usize> {
        let entries = self.list()?;
        let capacity = self.capacity();
        if entries.len() <= capacity {
            return Ok(0);
        }

        let excess = entries.len() - capacity;
        for entry in entries.iter().take(excess) {
            tracing::debug!(name = %entry.name, "evicting backup");
            self.store.delete(&entry.name)?;
        }
        Ok(excess)
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> PersistResult<usize> {
        let entries = self.list()?;
        for entry in &entries {
            self.store.delete(&entry.name)?;
        }
        Ok(entries.len())
    }

    fn parse_name(&self, name: &str) -> PersistResult<BackupEntry> {
        let suffix = name
            .strip_prefix(&self.prefix)
            .ok_or_else(|| PersistError::InvalidBackupName(name.to_string()))?;
        let (timestamp, sequence) = parse_normalized_timestamp(suffix)
            .ok_or_else(|| PersistError::InvalidBackupName(name.to_string()))?;
        Ok(BackupEntry {
            name: name.to_string(),
            timestamp,
            sequence,
        })
    }
}

impl std::fmt::Debug for BackupRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRing")
            .field("prefix", &self.prefix)
            .field("capacity", &self.capacity())
            .finish()
    }
}
