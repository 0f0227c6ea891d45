use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::settings::Method;

/// Default file name prefix for snapshots
pub const DEFAULT_PREFIX: &str = "backup-";

/// Extension used when the source database has none
pub const DEFAULT_EXTENSION: &str = "db";

/// A finished backup artifact. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub created_at: DateTime<Local>,
    pub method: Method,
    pub size_bytes: u64,
}

/// Naming convention snapshots follow: `<prefix><stamp>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPattern {
    pub prefix: String,
    pub extension: String,
}

impl SnapshotPattern {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// Pattern for snapshots of `source`, reusing its extension.
    pub fn for_source(prefix: &str, source: &Path) -> Self {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_EXTENSION);
        Self::new(prefix, ext)
    }

    /// The part between prefix and extension, if `file_name` follows the convention.
    pub fn stem<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let rest = file_name.strip_prefix(self.prefix.as_str())?;
        let stem = rest.strip_suffix(self.extension.as_str())?.strip_suffix('.')?;
        if stem.is_empty() { None } else { Some(stem) }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.stem(file_name).is_some()
    }

    pub fn file_name(&self, stem: &str) -> String {
        format!("{}{}.{}", self.prefix, stem, self.extension)
    }
}

/// A snapshot found on disk by the catalog.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub file_name: String,
    /// Embedded timestamp, or modification time when the name carries none
    pub created_at: DateTime<Local>,
    /// Same-second collision counter (`-N` suffix), 0 when absent
    pub counter: u32,
    /// Whether `created_at` came from the file name
    pub embedded: bool,
    pub size_bytes: u64,
}
