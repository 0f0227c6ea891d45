//! Backup configuration
//!
//! A [`BackupConfig`] is built once per invocation. Values come from an
//! optional JSON settings file overlaid with command-line flags, and are
//! validated in one place before any file is touched.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::snapshot::{DEFAULT_PREFIX, SnapshotPattern};
use crate::error::{BackupError, BackupResult};
use crate::retention::RetentionPolicy;

/// Default time the attach-copy strategy waits on a locked source
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Backup strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    /// Byte-for-byte copy of the database file
    #[value(alias = "cp")]
    DirectCopy,
    /// Table-by-table copy through an attached read-only source
    #[value(alias = "attach")]
    AttachCopy,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::DirectCopy => "direct-copy",
            Method::AttachCopy => "attach-copy",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct-copy" | "cp" => Ok(Method::DirectCopy),
            "attach-copy" | "attach" => Ok(Method::AttachCopy),
            other => Err(BackupError::config(format!(
                "unknown backup method '{}' (expected direct-copy or attach-copy)",
                other
            ))),
        }
    }
}

/// Fully resolved configuration for one backup run.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub source: PathBuf,
    /// Directory when timestamping, literal file path otherwise
    pub destination: PathBuf,
    pub method: Method,
    pub timestamp: bool,
    pub retention: Option<RetentionPolicy>,
    pub verify: bool,
    pub busy_timeout: Duration,
    pub prefix: String,
}

impl BackupConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, method: Method) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            method,
            timestamp: false,
            retention: None,
            verify: false,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Naming convention for snapshots of this source
    pub fn pattern(&self) -> SnapshotPattern {
        SnapshotPattern::for_source(&self.prefix, &self.source)
    }

    /// Directory snapshots land in and retention applies to
    pub fn snapshot_dir(&self) -> PathBuf {
        if self.timestamp {
            self.destination.clone()
        } else {
            match self.destination.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            }
        }
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.source.as_os_str().is_empty() {
            return Err(BackupError::config("missing source database path (--db)"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(BackupError::config("missing backup destination (--backup)"));
        }
        if self.busy_timeout.is_zero() {
            return Err(BackupError::config("busy timeout must be greater than zero"));
        }
        if self.prefix.is_empty() || self.prefix.contains(['/', '\\']) || self.prefix.starts_with('.') {
            return Err(BackupError::config(format!(
                "invalid snapshot prefix '{}'",
                self.prefix
            )));
        }
        if let Some(policy) = &self.retention {
            policy.validate()?;
        }
        Ok(())
    }
}

/// Settings as read from a JSON file or collected from flags.
/// Every field is optional so that sources can be overlaid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupSettings {
    pub db: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub method: Option<String>,
    pub timestamp: Option<bool>,
    pub retain_last: Option<usize>,
    pub retain_days: Option<i64>,
    pub verify: Option<bool>,
    pub busy_timeout_ms: Option<u64>,
    pub prefix: Option<String>,
}

impl BackupSettings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> BackupResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::config(format!("failed to read settings file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            BackupError::config(format!("invalid settings file {}: {}", path.display(), e))
        })
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overlay(self, other: BackupSettings) -> Self {
        Self {
            db: other.db.or(self.db),
            backup: other.backup.or(self.backup),
            method: other.method.or(self.method),
            timestamp: other.timestamp.or(self.timestamp),
            retain_last: other.retain_last.or(self.retain_last),
            retain_days: other.retain_days.or(self.retain_days),
            verify: other.verify.or(self.verify),
            busy_timeout_ms: other.busy_timeout_ms.or(self.busy_timeout_ms),
            prefix: other.prefix.or(self.prefix),
        }
    }

    /// Turn settings into a validated [`BackupConfig`]
    pub fn resolve(self) -> BackupResult<BackupConfig> {
        let source = self
            .db
            .ok_or_else(|| BackupError::config("missing source database path (--db)"))?;
        let destination = self
            .backup
            .ok_or_else(|| BackupError::config("missing backup destination (--backup)"))?;
        let method = match self.method.as_deref() {
            Some(m) => m.parse()?,
            None => Method::DirectCopy,
        };
        let retention = RetentionPolicy::from_limits(self.retain_last, self.retain_days)?;

        let config = BackupConfig {
            source,
            destination,
            method,
            timestamp: self.timestamp.unwrap_or(false),
            retention,
            verify: self.verify.unwrap_or(false),
            busy_timeout: Duration::from_millis(
                self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS),
            ),
            prefix: self.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        };
        config.validate()?;
        Ok(config)
    }
}

/// `keep-within` window from a day count
pub fn days_window(days: i64) -> BackupResult<TimeDelta> {
    if days < 1 {
        return Err(BackupError::config("--retain-days must be at least 1"));
    }
    TimeDelta::try_days(days)
        .ok_or_else(|| BackupError::config(format!("--retain-days {} is out of range", days)))
}
