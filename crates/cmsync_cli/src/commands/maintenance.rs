//! Metrics, config, legacy purge and reset commands.

use super::CliError;
use cmsync_persist::LocalPersistence;
use tracing::{info, warn};

/// Prints the metrics record.
pub fn metrics(persist: &LocalPersistence, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = persist.metrics();
    if super::is_json(format) {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!("Sessions:        {}", metrics.session_count);
    println!("Crashes:         {}", metrics.crash_count);
    println!("Startup latency: {} ms", metrics.startup_latency_ms);
    match metrics.last_backup_at {
        Some(at) => println!("Last backup:     {at}"),
        None => println!("Last backup:     never"),
    }
    if !metrics.recent_issues.is_empty() {
        println!("Recent issues:");
        for issue in &metrics.recent_issues {
            println!("  {}  {}", issue.at, issue.description);
        }
    }
    Ok(())
}

/// Loads the config record, repairing and saving it as a client would,
/// and prints it.
pub fn config(persist: &LocalPersistence) -> Result<(), Box<dyn std::error::Error>> {
    let config = persist.load_config();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Removes legacy keys.
pub fn purge_legacy(persist: &LocalPersistence) {
    let removed = persist.purge_legacy();
    println!("Removed {removed} legacy key(s)");
}

/// Deletes every key in the store. Requires confirmation.
pub fn reset(persist: &LocalPersistence, confirmed: bool) -> Result<(), CliError> {
    if !confirmed {
        warn!("reset requested without confirmation");
        return Err(CliError::Unconfirmed("reset the store"));
    }
    info!("Resetting store");
    let removed = persist.wipe_all();
    println!("✓ Store reset, {removed} key(s) removed");
    Ok(())
}
