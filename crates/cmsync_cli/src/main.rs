//! cmsync CLI
//!
//! Command-line tools for a cmsync client's local store.
//!
//! # Commands
//!
//! - `inspect` - Decode the current snapshot and show counts, config and metrics
//! - `backups list` / `backups restore` - Manage the backup ring
//! - `metrics` - Show the metrics record
//! - `config` - Show the config record, repairing it if needed
//! - `purge-legacy` - Remove keys left by older releases
//! - `reset` - Delete everything in the store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// cmsync local store tools.
#[derive(Parser)]
#[command(name = "cmsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Key namespace of the client
    #[arg(global = true, short, long, default_value = "cmsync")]
    namespace: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode the current snapshot and show store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show the metrics record
    Metrics {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the config record
    Config,

    /// Remove keys written by older releases
    PurgeLegacy,

    /// Delete every key in the store
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum BackupAction {
    /// List backups, oldest first
    List,

    /// Make a backup the current snapshot
    Restore {
        /// Backup name as shown by `backups list`
        name: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("cmsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Snapshot format v{}", cmsync_codec::CURRENT_FORMAT_VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required")?;
    let persist = commands::open(&path, &cli.namespace)?;

    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&persist, &format)?,
        Commands::Backups { action } => match action {
            BackupAction::List => commands::backups::list(&persist)?,
            BackupAction::Restore { name } => commands::backups::restore(&persist, &name)?,
        },
        Commands::Metrics { format } => commands::maintenance::metrics(&persist, &format)?,
        Commands::Config => commands::maintenance::config(&persist)?,
        Commands::PurgeLegacy => commands::maintenance::purge_legacy(&persist),
        Commands::Reset { yes } => commands::maintenance::reset(&persist, yes)?,
        Commands::Version => {}
    }

    Ok(())
}
