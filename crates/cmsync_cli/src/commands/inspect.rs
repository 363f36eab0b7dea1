//! Inspect command implementation.

use cmsync_codec::decode;
use cmsync_persist::{AppConfig, AppMetrics, LocalPersistence};
use cmsync_protocol::CollectionCounts;
use cmsync_storage::KeyValueStore;
use serde::Serialize;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Key namespace.
    pub namespace: String,
    /// Snapshot state.
    pub snapshot: SnapshotStatus,
    /// Number of backups.
    pub backup_count: usize,
    /// Newest backup name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_backup: Option<String>,
    /// Archived corrupt snapshots.
    pub corrupt_archives: usize,
    /// The stored config record, if present and parseable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<AppConfig>,
    /// The metrics record.
    pub metrics: AppMetrics,
}

/// What was found in the current snapshot slot.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// The slot is empty.
    Missing,
    /// The snapshot decoded.
    Valid {
        /// Data-format version.
        format_version: u32,
        /// Records per collection.
        counts: CollectionCounts,
        /// Records dropped by validation.
        dropped: usize,
        /// Duplicate ids discarded.
        duplicates: usize,
    },
    /// The snapshot is not decodable.
    Corrupt {
        /// Decoder error.
        error: String,
    },
}

/// Collects the inspection result without modifying the store.
pub fn collect(persist: &LocalPersistence) -> InspectResult {
    let snapshot = match persist.current_snapshot() {
        None => SnapshotStatus::Missing,
        Some(blob) => match decode(&blob) {
            Ok(decoded) => SnapshotStatus::Valid {
                format_version: decoded.snapshot.format_version,
                counts: decoded.snapshot.collections.counts(),
                dropped: decoded.report.dropped.len(),
                duplicates: decoded.report.duplicates,
            },
            Err(e) => SnapshotStatus::Corrupt {
                error: e.to_string(),
            },
        },
    };

    let backups = persist.backups();
    let config = persist
        .store()
        .get(&persist.keys().config())
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok());

    InspectResult {
        namespace: persist.keys().namespace().to_string(),
        snapshot,
        backup_count: backups.len(),
        latest_backup: backups.last().map(|b| b.name.clone()),
        corrupt_archives: persist.corrupt_archives().len(),
        config,
        metrics: persist.metrics(),
    }
}

/// Runs the inspect command.
pub fn run(persist: &LocalPersistence, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(persist);
    if super::is_json(format) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text_output(&result);
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("cmsync Store Inspection");
    println!("=======================");
    println!("Namespace: {}", result.namespace);
    println!();

    match &result.snapshot {
        SnapshotStatus::Missing => println!("Snapshot: none"),
        SnapshotStatus::Valid {
            format_version,
            counts,
            dropped,
            duplicates,
        } => {
            println!("Snapshot: valid (format v{format_version})");
            println!("  Products:      {}", counts.products);
            println!("  Templates:     {}", counts.templates);
            println!("  Text assets:   {}", counts.text_assets);
            println!("  Visual assets: {}", counts.visual_assets);
            println!("  Charts:        {}", counts.charts);
            if *dropped > 0 || *duplicates > 0 {
                println!("  Dropped: {dropped}, duplicates: {duplicates}");
            }
        }
        SnapshotStatus::Corrupt { error } => println!("Snapshot: CORRUPT ({error})"),
    }
    println!();

    println!("Backups: {}", result.backup_count);
    if let Some(latest) = &result.latest_backup {
        println!("  Latest: {latest}");
    }
    println!("Corrupt archives: {}", result.corrupt_archives);
    println!();

    match &result.config {
        Some(config) => println!(
            "Config: v{} (data format {}), max backups {}",
            config.version, config.data_format_version, config.max_backups
        ),
        None => println!("Config: none"),
    }
    println!(
        "Sessions: {}, crashes: {}",
        result.metrics.session_count, result.metrics.crash_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open;
    use cmsync_testkit::{corrupt_blob, sample_collections, snapshot_blob};
    use tempfile::TempDir;

    #[test]
    fn empty_store() {
        let dir = TempDir::new().unwrap();
        let result = collect(&open(dir.path(), "cmsync").unwrap());
        assert!(matches!(result.snapshot, SnapshotStatus::Missing));
        assert_eq!(result.backup_count, 0);
        assert!(result.config.is_none());
    }

    #[test]
    fn valid_snapshot_counts() {
        let dir = TempDir::new().unwrap();
        let persist = open(dir.path(), "cmsync").unwrap();
        persist.save_snapshot(&snapshot_blob(sample_collections(2)));
        persist.create_backup(&snapshot_blob(sample_collections(1)));

        let result = collect(&persist);
        match result.snapshot {
            SnapshotStatus::Valid { counts, dropped, .. } => {
                assert_eq!(counts.total(), 10);
                assert_eq!(dropped, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(result.backup_count, 1);
        assert!(result.latest_backup.is_some());
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = TempDir::new().unwrap();
        let persist = open(dir.path(), "cmsync").unwrap();
        persist.save_snapshot(&corrupt_blob());
        assert!(matches!(collect(&persist).snapshot, SnapshotStatus::Corrupt { .. }));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = open(&dir.path().join("absent"), "cmsync").unwrap_err();
        assert!(err.to_string().starts_with("no store found"));
    }
}
