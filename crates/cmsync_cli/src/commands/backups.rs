//! Backup list and restore commands.

use super::CliError;
use cmsync_codec::decode;
use cmsync_persist::LocalPersistence;
use tracing::info;

/// Lists backups, oldest first.
pub fn list(persist: &LocalPersistence) -> Result<(), Box<dyn std::error::Error>> {
    let backups = persist.backups();
    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }

    println!("{} backup(s), capacity {}", backups.len(), persist.ring().capacity());
    for entry in backups {
        let records = persist
            .read_backup(&entry.name)
            .and_then(|blob| decode(&blob).ok())
            .map(|d| d.snapshot.collections.counts().total().to_string())
            .unwrap_or_else(|| "unreadable".to_string());
        println!("  {}  {}  records: {}", entry.name, entry.timestamp, records);
    }
    Ok(())
}

/// Copies a backup into the current snapshot slot.
///
/// The backup must decode; a corrupt backup is never restored.
pub fn restore(persist: &LocalPersistence, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring backup {}", name);

    let blob = persist
        .read_backup(name)
        .ok_or_else(|| CliError::BackupNotFound(name.to_string()))?;
    let decoded = decode(&blob)?;

    if !persist.restore_backup(name) {
        return Err(format!("failed to write snapshot from {name}").into());
    }

    println!("✓ Backup restored");
    println!("  Name: {name}");
    println!("  Records: {}", decoded.snapshot.collections.counts().total());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open;
    use cmsync_testkit::{corrupt_blob, sample_collections, snapshot_blob};
    use tempfile::TempDir;

    #[test]
    fn restore_replaces_current_snapshot() {
        let dir = TempDir::new().unwrap();
        let persist = open(dir.path(), "cmsync").unwrap();
        let backup = snapshot_blob(sample_collections(1));
        let entry = persist.create_backup(&backup).unwrap();
        persist.save_snapshot(&corrupt_blob());

        restore(&persist, &entry.name).unwrap();
        assert_eq!(persist.current_snapshot().as_deref(), Some(backup.as_str()));
    }

    #[test]
    fn restore_unknown_backup_fails() {
        let dir = TempDir::new().unwrap();
        let persist = open(dir.path(), "cmsync").unwrap();
        let err = restore(&persist, "cmsync.backup.nope").unwrap_err();
        assert!(err.to_string().contains("backup not found"));
    }

    #[test]
    fn corrupt_backup_is_not_restored() {
        let dir = TempDir::new().unwrap();
        let persist = open(dir.path(), "cmsync").unwrap();
        let entry = persist.create_backup(&corrupt_blob()).unwrap();

        assert!(restore(&persist, &entry.name).is_err());
        assert!(persist.current_snapshot().is_none());
    }
}
