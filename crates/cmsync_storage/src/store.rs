//! Key/value store trait definition.

use crate::error::StorageResult;

/// A durable string-keyed store.
///
/// # Invariants
///
/// - `get` returns exactly the value of the last successful `set` for a key
/// - `set` is atomic: a reader never observes a partially written value
/// - `delete` of a missing key succeeds
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails.
    fn delete(&self, key: &str) -> StorageResult<()>;

    /// Lists every key currently stored, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn list_keys(&self) -> StorageResult<Vec<String>>;

    /// Lists keys starting with `prefix`, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .list_keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
