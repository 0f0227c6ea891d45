use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{BackupSettings, Method};
use crate::config::snapshot::{DEFAULT_EXTENSION, DEFAULT_PREFIX};

/// dbsnap: scheduled database snapshots with retention
#[derive(Parser, Debug)]
#[command(name = "dbsnap", version, about = "Take database snapshots and prune old ones.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Only log warnings and errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy a database into a snapshot, then apply retention
    Backup(BackupArgs),

    /// List snapshots in a directory
    List {
        /// Directory holding snapshots
        dir: PathBuf,
        /// Snapshot file extension
        #[arg(long, default_value = DEFAULT_EXTENSION)]
        ext: String,
        /// Snapshot file name prefix
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,
    },

    /// Delete snapshots outside a retention policy
    Prune {
        /// Directory holding snapshots
        dir: PathBuf,
        /// Keep only the N most recent snapshots
        #[arg(long, value_name = "N", required_unless_present = "retain_days", conflicts_with = "retain_days")]
        retain_last: Option<usize>,
        /// Keep only snapshots from the last D days
        #[arg(long, value_name = "D")]
        retain_days: Option<i64>,
        /// Snapshot file extension
        #[arg(long, default_value = DEFAULT_EXTENSION)]
        ext: String,
        /// Snapshot file name prefix
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct BackupArgs {
    /// Path to the source database
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,
    /// Backup file, or directory when --timestamp is given
    #[arg(long, value_name = "PATH")]
    pub backup: Option<PathBuf>,
    /// Backup method [default: direct-copy]
    #[arg(long, value_enum)]
    pub method: Option<Method>,
    /// Name the snapshot backup-YYYYMMDD-HHMMSS.<ext> inside --backup
    #[arg(long)]
    pub timestamp: bool,
    /// After a successful backup keep only the N most recent snapshots
    #[arg(long, value_name = "N", conflicts_with = "retain_days")]
    pub retain_last: Option<usize>,
    /// After a successful backup delete snapshots older than D days
    #[arg(long, value_name = "D")]
    pub retain_days: Option<i64>,
    /// Check the copy against the source before publishing it
    #[arg(long)]
    pub verify: bool,
    /// How long attach-copy waits on a locked source
    #[arg(long, value_name = "MS")]
    pub busy_timeout_ms: Option<u64>,
    /// Snapshot file name prefix [default: backup-]
    #[arg(long)]
    pub prefix: Option<String>,
    /// JSON settings file; flags override its values
    #[arg(long, value_name = "FILE", env = "DBSNAP_CONFIG")]
    pub config: Option<PathBuf>,
    /// Print the snapshot as JSON instead of its path
    #[arg(long)]
    pub json: bool,
}

impl BackupArgs {
    /// Settings carried by the flags alone; unset flags stay `None`.
    pub fn settings(&self) -> BackupSettings {
        BackupSettings {
            db: self.db.clone(),
            backup: self.backup.clone(),
            method: self.method.map(|m| m.as_str().to_string()),
            timestamp: self.timestamp.then_some(true),
            retain_last: self.retain_last,
            retain_days: self.retain_days,
            verify: self.verify.then_some(true),
            busy_timeout_ms: self.busy_timeout_ms,
            prefix: self.prefix.clone(),
        }
    }
}
