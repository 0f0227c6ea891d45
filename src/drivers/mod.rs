use std::path::Path;

use crate::config::Method;
use crate::error::BackupResult;

pub mod filesystem;
pub mod selector;
pub mod sqlite;

/// A way of producing a snapshot of a database.
///
/// The orchestrator only talks to this trait; adding a strategy means a new
/// [`Method`] variant and an impl, nothing else.
pub trait CopyStrategy {
    fn method(&self) -> Method;

    /// Write a complete copy of `source` into `staging`, which does not exist yet.
    /// On error the caller discards whatever was left at `staging`.
    fn copy(&self, source: &Path, staging: &Path, observer: &dyn CopyObserver) -> BackupResult<()>;

    /// Check that `staging` holds the same content as `source`.
    fn verify(&self, source: &Path, staging: &Path) -> BackupResult<()>;
}

/// Receives progress from a running strategy.
pub trait CopyObserver {
    /// Called before each table is copied. An error aborts the copy.
    fn table(&self, _name: &str, _index: usize, _total: usize) -> BackupResult<()> {
        Ok(())
    }

    fn bytes(&self, _copied: u64, _total: u64) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl CopyObserver for NoopObserver {}
