//! Error types for dbsnap
//!
//! Every failure carries the path, phase and underlying cause needed to
//! diagnose it. The binary maps each category to its own exit code.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a backup run an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Copy,
    Verify,
    Publish,
    List,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Resolve => "resolve",
            Phase::Copy => "copy",
            Phase::Verify => "verify",
            Phase::Publish => "publish",
            Phase::List => "list",
        };
        f.write_str(s)
    }
}

/// The main error type for backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid or incomplete configuration; raised before any file is touched
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source database not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source is locked by another process and did not free up in time
    #[error("Source database is busy: {}: {reason}", path.display())]
    SourceBusy { path: PathBuf, reason: String },

    /// Permission denied or out of space at the destination
    #[error("Destination not writable: {}: {source}", path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Copy failed on table '{table}': {reason}")]
    PartialTableCopy { table: String, reason: String },

    #[error("Copy of {} failed after {copied} of {total} bytes: {reason}", path.display())]
    PartialByteCopy {
        path: PathBuf,
        copied: u64,
        total: u64,
        reason: String,
    },

    #[error("I/O error during {phase} at {}: {source}", path.display())]
    Io {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Database error during {phase} ({context}): {reason}")]
    Database {
        phase: Phase,
        context: String,
        reason: String,
    },

    #[error("Verification failed for {}: {reason}", path.display())]
    VerificationFailed { path: PathBuf, reason: String },

    /// Per-file deletion failure; never fatal to a backup run
    #[error("Failed to prune {}: {reason}", path.display())]
    PruneFailure { path: PathBuf, reason: String },
}

impl BackupError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io(phase: Phase, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            phase,
            path: path.into(),
            source,
        }
    }

    pub fn database(phase: Phase, context: impl Into<String>, err: rusqlite::Error) -> Self {
        Self::Database {
            phase,
            context: context.into(),
            reason: err.to_string(),
        }
    }

    /// Process exit code for this error's category
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::SourceNotFound { .. } => 3,
            Self::SourceBusy { .. } => 4,
            Self::DestinationUnwritable { .. } => 5,
            Self::PartialTableCopy { .. } | Self::PartialByteCopy { .. } => 6,
            Self::VerificationFailed { .. } => 7,
            Self::Io { .. } | Self::Database { .. } | Self::PruneFailure { .. } => 1,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// True when SQLite reported the database as locked by another connection.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Result type alias for backup operations
pub type BackupResult<T> = Result<T, BackupError>;
