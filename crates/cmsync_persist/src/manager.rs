//! The local persistence manager.
//!
//! Owns every key in the client's local store. All operations are
//! best-effort: storage and serialization failures are logged and turned
//! into `None`, `false` or defaults.

use crate::backup::{BackupEntry, BackupRing, DEFAULT_BACKUP_CAPACITY};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::{PersistError, PersistResult};
use crate::keys::KeyLayout;
use crate::metrics::{AppMetrics, MetricsUpdate};
use cmsync_storage::KeyValueStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Key prefixes written by earlier client generations.
pub const LEGACY_KEY_PREFIXES: &[&str] = &[
    "cms_state",
    "cms.snapshot",
    "cms.backup.",
    "cmsync.v1.",
];

/// Data-format version written when none is configured.
const DEFAULT_DATA_FORMAT_VERSION: u32 = 2;

/// Configuration for [`LocalPersistence`].
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Namespace shared by every owned key.
    pub namespace: String,
    /// Backup ring capacity until a config record overrides it.
    pub max_backups: usize,
    /// Prefixes removed by [`LocalPersistence::purge_legacy`].
    pub legacy_prefixes: Vec<String>,
    /// Software version stamped into the config record.
    pub software_version: String,
    /// Data-format version stamped into the config record and marker key.
    pub data_format_version: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            namespace: "cmsync".into(),
            max_backups: DEFAULT_BACKUP_CAPACITY,
            legacy_prefixes: LEGACY_KEY_PREFIXES.iter().map(|p| p.to_string()).collect(),
            software_version: env!("CARGO_PKG_VERSION").into(),
            data_format_version: DEFAULT_DATA_FORMAT_VERSION,
        }
    }
}

impl PersistConfig {
    /// Sets the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the initial backup capacity.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Replaces the legacy prefix list.
    pub fn with_legacy_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the software version.
    pub fn with_software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = version.into();
        self
    }

    /// Sets the data-format version.
    pub fn with_data_format_version(mut self, version: u32) -> Self {
        self.data_format_version = version;
        self
    }
}

/// Local snapshot, backup, config and metrics persistence.
pub struct LocalPersistence {
    store: Arc<dyn KeyValueStore>,
    config: PersistConfig,
    keys: KeyLayout,
    ring: BackupRing,
    corrupt: BackupRing,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles on the metrics record.
    metrics_lock: Mutex<()>,
}

impl LocalPersistence {
    /// Creates a manager over `store` using the system clock.
    pub fn new(store: Arc<dyn KeyValueStore>, config: PersistConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Creates a manager with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        config: PersistConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = KeyLayout::new(config.namespace.clone());
        let ring = BackupRing::new(store.clone(), keys.backup_prefix(), config.max_backups);
        // Corrupt archives share the naming scheme but are never evicted.
        let corrupt = BackupRing::new(store.clone(), keys.corrupt_prefix(), usize::MAX);
        Self {
            store,
            config,
            keys,
            ring,
            corrupt,
            clock,
            metrics_lock: Mutex::new(()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The key layout.
    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    /// The backup ring.
    pub fn ring(&self) -> &BackupRing {
        &self.ring
    }

    /// The clock used for names and metrics.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The manager configuration.
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    // =========================================================================
    // Legacy keys
    // =========================================================================

    /// Removes every key under a legacy prefix and writes the data-format
    /// marker. Returns the number of keys removed.
    pub fn purge_legacy(&self) -> usize {
        let removed = self
            .swallow("purge legacy keys", self.try_purge_legacy())
            .unwrap_or(0);
        self.swallow(
            "write format marker",
            self.store
                .set(
                    &self.keys.format_version(),
                    &self.config.data_format_version.to_string(),
                )
                .map_err(PersistError::from),
        );
        if removed > 0 {
            tracing::info!(removed, "purged legacy keys");
        }
        removed
    }

    fn try_purge_legacy(&self) -> PersistResult<usize> {
        let mut removed = 0;
        for key in self.store.list_keys()? {
            if self.is_legacy(&key) {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_legacy(&self, key: &str) -> bool {
        if self.keys.owns(key) {
            return false;
        }
        self.config
            .legacy_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && key.starts_with(prefix.as_str()))
    }

    // =========================================================================
    // Config
    // =========================================================================

    /// The configuration this build writes when nothing is stored.
    pub fn default_app_config(&self) -> AppConfig {
        let mut config = AppConfig::defaults(
            self.config.software_version.clone(),
            self.config.data_format_version,
        );
        config.max_backups = self.config.max_backups.clamp(1, 100);
        config
    }

    /// Loads the config record, repairing it as needed, and applies it.
    ///
    /// Never fails: an absent or unparseable record is replaced with
    /// defaults, a record from another version is upgraded in place.
    pub fn load_config(&self) -> AppConfig {
        let defaults = self.default_app_config();
        let key = self.keys.config();

        let config = match self.swallow("read config", self.store.get(&key).map_err(Into::into)) {
            // Unreadable store: use defaults without overwriting anything.
            None => defaults,
            Some(None) => {
                tracing::info!("no stored config, writing defaults");
                self.save_config(&defaults);
                defaults
            }
            Some(Some(raw)) => match serde_json::from_str(&raw) {
                Err(e) => {
                    tracing::warn!(error = %e, "stored config is unparseable, resetting");
                    self.save_config(&defaults);
                    defaults
                }
                Ok(value) => {
                    let (mut config, merge) = AppConfig::merge_stored(&value, &defaults);
                    let mut resave = merge.changed();
                    if merge.changed() {
                        tracing::debug!(
                            filled = ?merge.filled,
                            invalid = ?merge.invalid,
                            "config fields defaulted"
                        );
                    }
                    if config.is_stale(
                        &self.config.software_version,
                        self.config.data_format_version,
                    ) {
                        tracing::info!(
                            from = %config.version,
                            to = %self.config.software_version,
                            "config written by another version, upgrading"
                        );
                        config.version = self.config.software_version.clone();
                        config.data_format_version = self.config.data_format_version;
                        resave = true;
                    }
                    if resave {
                        self.save_config(&config);
                    }
                    config
                }
            },
        };

        self.apply_config(&config);
        config
    }

    /// Persists `config`. Returns true on success.
    pub fn save_config(&self, config: &AppConfig) -> bool {
        let result = serde_json::to_string(config)
            .map_err(PersistError::from)
            .and_then(|raw| Ok(self.store.set(&self.keys.config(), &raw)?));
        self.swallow("save config", result).is_some()
    }

    /// Applies the runtime-relevant parts of `config`.
    pub fn apply_config(&self, config: &AppConfig) {
        self.ring.set_capacity(config.max_backups);
    }

    // =========================================================================
    // Snapshots and backups
    // =========================================================================

    /// The current snapshot blob, if any.
    pub fn current_snapshot(&self) -> Option<String> {
        self.swallow(
            "read current snapshot",
            self.store
                .get(&self.keys.current_snapshot())
                .map_err(Into::into),
        )
        .flatten()
    }

    /// Overwrites the current snapshot slot. Returns true on success.
    pub fn save_snapshot(&self, blob: &str) -> bool {
        self.swallow(
            "save current snapshot",
            self.store
                .set(&self.keys.current_snapshot(), blob)
                .map_err(Into::into),
        )
        .is_some()
    }

    /// Pushes `blob` into the backup ring and evicts down to capacity.
    pub fn create_backup(&self, blob: &str) -> Option<BackupEntry> {
        let at = self.clock.now();
        let entry = self.swallow("create backup", self.ring.insert(at, blob))?;

        if let Some(evicted) = self.swallow("evict backups", self.ring.evict()) {
            if evicted > 0 {
                tracing::debug!(evicted, "old backups evicted");
            }
        }
        self.record_metrics(&MetricsUpdate::new().backup_at(at));
        tracing::info!(name = %entry.name, "backup created");
        Some(entry)
    }

    /// Backup ring entries, oldest first.
    pub fn backups(&self) -> Vec<BackupEntry> {
        self.swallow("list backups", self.ring.list())
            .unwrap_or_default()
    }

    /// The blob of one backup.
    pub fn read_backup(&self, name: &str) -> Option<String> {
        self.swallow("read backup", self.ring.get(name)).flatten()
    }

    /// Copies a backup into the current snapshot slot. Returns true on
    /// success.
    pub fn restore_backup(&self, name: &str) -> bool {
        match self.read_backup(name) {
            Some(blob) => self.save_snapshot(&blob),
            None => {
                tracing::warn!(name, "backup not found");
                false
            }
        }
    }

    /// Stores an unparseable snapshot outside the ring. Returns its key.
    pub fn archive_corrupt(&self, blob: &str) -> Option<String> {
        let entry = self.swallow(
            "archive corrupt snapshot",
            self.corrupt.insert(self.clock.now(), blob),
        )?;
        tracing::warn!(name = %entry.name, "corrupt snapshot archived");
        Some(entry.name)
    }

    /// Keys of archived corrupt snapshots, oldest first.
    pub fn corrupt_archives(&self) -> Vec<String> {
        self.swallow("list corrupt archives", self.corrupt.list())
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// The persisted metrics record, or zeros if absent or unreadable.
    pub fn metrics(&self) -> AppMetrics {
        self.swallow("read metrics", self.read_metrics())
            .unwrap_or_default()
    }

    fn read_metrics(&self) -> PersistResult<AppMetrics> {
        Ok(match self.store.get(&self.keys.metrics())? {
            None => AppMetrics::default(),
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "metrics record unreadable, starting from zero");
                AppMetrics::default()
            }),
        })
    }

    /// Merges `update` into the persisted metrics record.
    ///
    /// Failures here are logged only, never recorded as issues.
    pub fn record_metrics(&self, update: &MetricsUpdate) -> AppMetrics {
        let _guard = self.metrics_lock.lock();
        let mut metrics = self.read_metrics().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "metrics record unreadable, starting from zero");
            AppMetrics::default()
        });
        metrics.apply(update, self.clock.now());

        let result = serde_json::to_string(&metrics)
            .map_err(PersistError::from)
            .and_then(|raw| Ok(self.store.set(&self.keys.metrics(), &raw)?));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to save metrics");
        }
        metrics
    }

    /// Logs an error and appends it to the recent-issues list.
    pub fn report_issue(&self, context: &str, error: &dyn fmt::Display) {
        tracing::error!(context, error = %error, "issue reported");
        self.record_issue(context, error);
    }

    /// Appends an already logged error to the recent-issues list.
    pub fn record_issue(&self, context: &str, error: &dyn fmt::Display) {
        self.record_metrics(&MetricsUpdate::new().issue(format!("{context}: {error}")));
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Deletes every key in the local store. Returns how many were removed.
    pub fn wipe_all(&self) -> usize {
        let result = (|| -> PersistResult<usize> {
            let keys = self.store.list_keys()?;
            for key in &keys {
                self.store.delete(key)?;
            }
            Ok(keys.len())
        })();
        let removed = self.swallow("wipe local store", result).unwrap_or(0);
        tracing::warn!(removed, "local store wiped");
        removed
    }

    fn swallow<T>(&self, operation: &'static str, result: PersistResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "local persistence failed");
                self.record_issue(operation, &e);
                None
            }
        }
    }
}

impl fmt::Debug for LocalPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPersistence")
            .field("namespace", &self.keys.namespace())
            .field("ring", &self.ring)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use cmsync_storage::InMemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        persist: LocalPersistence,
    }

    fn fixture(config: PersistConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap(),
        ));
        let persist = LocalPersistence::with_clock(store.clone(), config, clock.clone());
        Fixture {
            store,
            clock,
            persist,
        }
    }

    fn config() -> PersistConfig {
        PersistConfig::default().with_software_version("1.4.0")
    }

    #[test]
    fn purge_removes_only_legacy_keys_and_writes_marker() {
        let f = fixture(config());
        f.store.set("cms_state", "{}").unwrap();
        f.store.set("cms.backup.2024", "{}").unwrap();
        f.store.set("cmsync.config", "{}").unwrap();

        assert_eq!(f.persist.purge_legacy(), 2);
        assert_eq!(f.store.get("cmsync.format_version").unwrap().as_deref(), Some("2"));
        assert!(f.store.get("cmsync.config").unwrap().is_some());
        assert!(f.store.get("cms_state").unwrap().is_none());
    }

    #[test]
    fn purge_keeps_own_keys_when_namespace_overlaps_legacy_prefix() {
        let f = fixture(config().with_namespace("cms"));
        f.store.set("cms_state", "{}").unwrap();
        assert!(f.persist.save_snapshot("current"));
        let backup = f.persist.create_backup("backup").unwrap();

        assert_eq!(f.persist.purge_legacy(), 1);
        assert_eq!(f.persist.current_snapshot().as_deref(), Some("current"));
        assert_eq!(f.persist.read_backup(&backup.name).as_deref(), Some("backup"));
        assert!(f.store.get("cms_state").unwrap().is_none());
    }

    #[test]
    fn purge_still_removes_legacy_keys_inside_own_namespace() {
        let f = fixture(config());
        f.store.set("cmsync.v1.state", "{}").unwrap();
        f.persist.save_snapshot("current");

        assert_eq!(f.persist.purge_legacy(), 1);
        assert!(f.store.get("cmsync.v1.state").unwrap().is_none());
        assert!(f.persist.current_snapshot().is_some());
    }

    #[test]
    fn purge_never_fails() {
        let f = fixture(config());
        f.store.set_failing(true);
        assert_eq!(f.persist.purge_legacy(), 0);
    }

    #[test]
    fn absent_config_writes_defaults() {
        let f = fixture(config());
        let loaded = f.persist.load_config();
        assert_eq!(loaded, f.persist.default_app_config());

        let stored: serde_json::Value =
            serde_json::from_str(&f.store.get("cmsync.config").unwrap().unwrap()).unwrap();
        assert_eq!(stored["version"], json!("1.4.0"));
    }

    #[test]
    fn stored_config_is_merged_and_upgraded() {
        let f = fixture(config());
        f.store
            .set(
                "cmsync.config",
                r#"{"version":"1.2.0","data_format_version":1,"theme":"dark","max_backups":3,"pinned":true}"#,
            )
            .unwrap();

        let loaded = f.persist.load_config();
        assert_eq!(loaded.theme, crate::Theme::Dark);
        assert_eq!(loaded.max_backups, 3);
        assert_eq!(loaded.version, "1.4.0");
        assert_eq!(loaded.data_format_version, 2);
        assert_eq!(f.persist.ring().capacity(), 3);

        let stored: serde_json::Value =
            serde_json::from_str(&f.store.get("cmsync.config").unwrap().unwrap()).unwrap();
        assert_eq!(stored["version"], json!("1.4.0"));
        assert_eq!(stored["pinned"], json!(true));
        assert_eq!(stored["autosave_interval_secs"], json!(30));
    }

    #[test]
    fn unparseable_config_is_reset() {
        let f = fixture(config());
        f.store.set("cmsync.config", "{not json").unwrap();
        let loaded = f.persist.load_config();
        assert_eq!(loaded, f.persist.default_app_config());
        assert!(f
            .store
            .get("cmsync.config")
            .unwrap()
            .unwrap()
            .starts_with('{'));
    }

    #[test]
    fn failing_store_yields_defaults() {
        let f = fixture(config());
        f.store.set_failing(true);
        assert_eq!(f.persist.load_config(), f.persist.default_app_config());
        assert!(f.persist.current_snapshot().is_none());
        assert!(!f.persist.save_snapshot("x"));
        assert!(f.persist.create_backup("x").is_none());
        assert!(f.persist.backups().is_empty());
        assert_eq!(f.persist.metrics(), AppMetrics::default());
    }

    #[test]
    fn snapshot_slot_overwrites() {
        let f = fixture(config());
        assert!(f.persist.current_snapshot().is_none());
        assert!(f.persist.save_snapshot("a"));
        assert!(f.persist.save_snapshot("b"));
        assert_eq!(f.persist.current_snapshot().as_deref(), Some("b"));
    }

    #[test]
    fn backups_rotate_and_stamp_metrics() {
        let f = fixture(config().with_max_backups(10));
        for i in 1..=15 {
            f.clock.advance(Duration::seconds(1));
            assert!(f.persist.create_backup(&format!("b{i}")).is_some());
        }

        let backups = f.persist.backups();
        assert_eq!(backups.len(), 10);
        assert_eq!(f.persist.read_backup(&backups[0].name).as_deref(), Some("b6"));
        assert_eq!(f.persist.read_backup(&backups[9].name).as_deref(), Some("b15"));
        assert_eq!(f.persist.metrics().last_backup_at, Some(f.clock.now()));
    }

    #[test]
    fn restore_backup_copies_into_current_slot() {
        let f = fixture(config());
        let entry = f.persist.create_backup("older").unwrap();
        f.persist.save_snapshot("newer");

        assert!(f.persist.restore_backup(&entry.name));
        assert_eq!(f.persist.current_snapshot().as_deref(), Some("older"));
        assert!(!f.persist.restore_backup("cmsync.backup.missing"));
    }

    #[test]
    fn corrupt_archives_live_outside_the_ring() {
        let f = fixture(config().with_max_backups(1));
        let name = f.persist.archive_corrupt("garbage").unwrap();
        assert!(name.starts_with("cmsync.corrupt."));

        f.persist.create_backup("a");
        f.clock.advance(Duration::seconds(1));
        f.persist.create_backup("b");

        assert_eq!(f.persist.backups().len(), 1);
        assert_eq!(f.persist.corrupt_archives(), vec![name.clone()]);
        assert_eq!(f.store.get(&name).unwrap().as_deref(), Some("garbage"));
    }

    #[test]
    fn metrics_accumulate_from_zero_baseline() {
        let f = fixture(config());
        f.store.set("cmsync.metrics", "not json").unwrap();

        f.persist.record_metrics(&MetricsUpdate::new().crash());
        f.persist.record_metrics(&MetricsUpdate::new().crash().session());

        let metrics = f.persist.metrics();
        assert_eq!(metrics.crash_count, 2);
        assert_eq!(metrics.session_count, 1);
    }

    #[test]
    fn report_issue_appends_description() {
        let f = fixture(config());
        f.persist.report_issue("import snapshot", &"bad envelope");
        let issues = f.persist.metrics().recent_issues;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].description, "import snapshot: bad envelope");
    }

    #[test]
    fn storage_failures_are_recorded_as_issues() {
        let f = fixture(config());
        f.store.fail_key("cmsync.snapshot.current");
        assert!(!f.persist.save_snapshot("x"));
        let issues = f.persist.metrics().recent_issues;
        assert_eq!(issues.len(), 1);
        assert!(issues[0].description.starts_with("save current snapshot: "));
    }

    #[test]
    fn wipe_all_clears_everything() {
        let f = fixture(config());
        f.persist.load_config();
        f.persist.save_snapshot("s");
        f.persist.create_backup("b");
        f.store.set("foreign", "x").unwrap();

        assert!(f.persist.wipe_all() >= 4);
        assert!(f.store.is_empty());
    }
}
