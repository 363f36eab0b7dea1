//! File-based key/value store for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <root>/
//! ├─ LOCK        # Advisory lock, one process per store
//! └─ keys/       # One file per key, file name = escaped key
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const LOCK_FILE: &str = "LOCK";
const KEYS_DIR: &str = "keys";
const TEMP_PREFIX: &str = ".tmp-";

/// A file-based key/value store.
///
/// Values survive process restarts.
///
/// # Durability
///
/// - `set` writes to a temporary file, syncs it and renames it over the
///   target, so a crash leaves either the old or the new value
/// - `delete` removes the file; a missing file is not an error
///
/// # Thread Safety
///
/// Writes are serialized by an internal lock. The `LOCK` file is held for
/// the lifetime of the store, so a second process opening the same
/// directory fails with [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use cmsync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("client-data")).unwrap();
/// store.set("cmsync.config", "{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    keys_dir: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(root: &Path) -> StorageResult<Self> {
        let keys_dir = root.join(KEYS_DIR);
        fs::create_dir_all(&keys_dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            keys_dir,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.keys_dir.join(escape_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::InvalidUtf8(key.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let _guard = self.write_lock.lock();

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.keys_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.as_file().sync_all()?;
        persist(temp, &path)?;

        sync_directory(&self.keys_dir);
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.keys_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Some(key) = unescape_key(name) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn persist(temp: NamedTempFile, path: &Path) -> StorageResult<()> {
    temp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn sync_directory(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) {}

/// Escapes a key into a portable file name.
///
/// `[A-Za-z0-9_-]` and interior `.` pass through, everything else becomes
/// `%XX` per UTF-8 byte.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let passthrough = byte.is_ascii_alphanumeric()
            || byte == b'_'
            || byte == b'-'
            || (byte == b'.' && i > 0);
        if passthrough {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
