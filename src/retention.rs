//! Retention policies and snapshot pruning
//!
//! The pruner only ever touches files that follow the snapshot naming
//! convention. A file that cannot be deleted is recorded in the report and
//! pruning carries on with the rest.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeDelta};
use log::{info, warn};

use crate::config::settings::days_window;
use crate::config::{SnapshotEntry, SnapshotPattern};
use crate::error::{BackupError, BackupResult};
use crate::storage;

/// Which snapshots survive pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the N most recent snapshots
    KeepLast(usize),
    /// Keep snapshots younger than the window
    KeepWithin(TimeDelta),
}

impl RetentionPolicy {
    /// Build a policy from the `--retain-last` / `--retain-days` pair.
    pub fn from_limits(last: Option<usize>, days: Option<i64>) -> BackupResult<Option<Self>> {
        let policy = match (last, days) {
            (Some(_), Some(_)) => {
                return Err(BackupError::config(
                    "--retain-last and --retain-days are mutually exclusive",
                ));
            }
            (Some(n), None) => Some(RetentionPolicy::KeepLast(n)),
            (None, Some(d)) => Some(RetentionPolicy::KeepWithin(days_window(d)?)),
            (None, None) => None,
        };
        if let Some(p) = &policy {
            p.validate()?;
        }
        Ok(policy)
    }

    pub fn validate(&self) -> BackupResult<()> {
        match self {
            RetentionPolicy::KeepLast(0) => {
                Err(BackupError::config("--retain-last must be at least 1"))
            }
            RetentionPolicy::KeepWithin(window) if *window <= TimeDelta::zero() => {
                Err(BackupError::config("retention window must be positive"))
            }
            _ => Ok(()),
        }
    }

    /// Split `entries` (newest first) into (keep, expire).
    pub fn partition<'a>(
        &self,
        entries: &'a [SnapshotEntry],
        now: DateTime<Local>,
    ) -> (Vec<&'a SnapshotEntry>, Vec<&'a SnapshotEntry>) {
        match self {
            RetentionPolicy::KeepLast(n) => {
                let cut = (*n).min(entries.len());
                (entries[..cut].iter().collect(), entries[cut..].iter().collect())
            }
            RetentionPolicy::KeepWithin(window) => {
                let cutoff = now - *window;
                entries.iter().partition(|e| e.created_at >= cutoff)
            }
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::KeepLast(n) => write!(f, "keep-last({})", n),
            RetentionPolicy::KeepWithin(w) if w.num_seconds() % 86_400 == 0 => {
                write!(f, "keep-within({} days)", w.num_days())
            }
            RetentionPolicy::KeepWithin(w) => write!(f, "keep-within({}s)", w.num_seconds()),
        }
    }
}

/// Outcome of a pruning pass
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Deleted files, or files that would be deleted on a dry run
    pub deleted: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    pub failures: Vec<BackupError>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn from_failure(err: BackupError) -> Self {
        Self {
            failures: vec![err],
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes one expired snapshot
pub trait SnapshotRemover {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Removes snapshot files from the local filesystem
pub struct FsRemover;

impl SnapshotRemover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Applies a [`RetentionPolicy`] to the snapshots in one directory
pub struct Pruner {
    dir: PathBuf,
    pattern: SnapshotPattern,
    policy: RetentionPolicy,
    dry_run: bool,
    protected: Vec<PathBuf>,
}

impl Pruner {
    pub fn new(dir: impl Into<PathBuf>, pattern: SnapshotPattern, policy: RetentionPolicy) -> Self {
        Self {
            dir: dir.into(),
            pattern,
            policy,
            dry_run: false,
            protected: Vec::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Never delete `path`, whatever the policy says about it.
    pub fn protect(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete snapshots outside the policy.
    ///
    /// Fails only when the directory cannot be listed; per-file deletion
    /// errors end up in [`PruneReport::failures`].
    pub fn prune(&self, now: DateTime<Local>) -> BackupResult<PruneReport> {
        self.prune_with(now, &FsRemover)
    }

    /// Like [`Pruner::prune`], deleting through `remover`.
    pub fn prune_with(
        &self,
        now: DateTime<Local>,
        remover: &dyn SnapshotRemover,
    ) -> BackupResult<PruneReport> {
        let entries = storage::list_snapshots(&self.dir, &self.pattern)?;
        let (keep, expire) = self.policy.partition(&entries, now);
        let (spared, expire): (Vec<_>, Vec<_>) =
            expire.into_iter().partition(|e| self.is_protected(&e.path));

        let mut report = PruneReport {
            kept: keep.iter().chain(&spared).map(|e| e.path.clone()).collect(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        for entry in expire {
            if self.dry_run {
                info!("Would prune {}", entry.file_name);
                report.deleted.push(entry.path.clone());
                continue;
            }
            match remover.remove(&entry.path) {
                Ok(()) => {
                    info!("Pruned {}", entry.file_name);
                    report.deleted.push(entry.path.clone());
                }
                Err(e) => {
                    warn!("Failed to prune {}: {}", entry.path.display(), e);
                    report.failures.push(BackupError::PruneFailure {
                        path: entry.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected.iter().any(|p| {
            p == path
                || matches!(
                    (fs::canonicalize(p), fs::canonicalize(path)),
                    (Ok(a), Ok(b)) if a == b
                )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::STAMP_FORMAT;
    use tempfile::TempDir;

    fn write_snapshot(dir: &Path, at: DateTime<Local>) -> PathBuf {
        let path = dir.join(format!("backup-{}.db", at.format(STAMP_FORMAT)));
        fs::write(&path, b"snapshot").unwrap();
        path
    }

    fn pattern() -> SnapshotPattern {
        SnapshotPattern::new("backup-", "db")
    }

    #[test]
    fn test_keep_last_two_of_five() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let paths: Vec<_> = (0..5)
            .map(|i| write_snapshot(temp.path(), now - TimeDelta::hours(i)))
            .collect();

        let report = Pruner::new(temp.path(), pattern(), RetentionPolicy::KeepLast(2))
            .prune(now)
            .unwrap();

        assert_eq!(report.deleted.len(), 3);
        assert!(report.is_clean());
        assert!(paths[0].exists());
        assert!(paths[1].exists());
        assert!(paths[2..].iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_keep_within_thirty_days() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let old = write_snapshot(temp.path(), now - TimeDelta::days(31));
        let recent = write_snapshot(temp.path(), now - TimeDelta::days(29));

        let policy = RetentionPolicy::KeepWithin(TimeDelta::days(30));
        let report = Pruner::new(temp.path(), pattern(), policy).prune(now).unwrap();

        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_never_touches_foreign_files() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        for name in ["notes.txt", "backup-20200101-000000.sqlite", "app.db", "backup-20200101-000000.db-wal"] {
            fs::write(temp.path().join(name), b"keep me").unwrap();
        }
        write_snapshot(temp.path(), now - TimeDelta::days(400));

        let policy = RetentionPolicy::KeepWithin(TimeDelta::days(1));
        let report = Pruner::new(temp.path(), pattern(), policy).prune(now).unwrap();

        assert_eq!(report.deleted.len(), 1);
        for name in ["notes.txt", "backup-20200101-000000.sqlite", "app.db", "backup-20200101-000000.db-wal"] {
            assert!(temp.path().join(name).exists(), "{} was deleted", name);
        }
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let paths: Vec<_> = (0..3)
            .map(|i| write_snapshot(temp.path(), now - TimeDelta::days(i)))
            .collect();

        let report = Pruner::new(temp.path(), pattern(), RetentionPolicy::KeepLast(1))
            .dry_run(true)
            .prune(now)
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.deleted.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_protected_snapshot_survives_policy() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let stale = write_snapshot(temp.path(), now - TimeDelta::days(60));
        let older = write_snapshot(temp.path(), now - TimeDelta::days(61));

        let policy = RetentionPolicy::KeepWithin(TimeDelta::days(30));
        let report = Pruner::new(temp.path(), pattern(), policy)
            .protect(&stale)
            .prune(now)
            .unwrap();

        assert_eq!(report.deleted, vec![older.clone()]);
        assert_eq!(report.kept, vec![stale.clone()]);
        assert!(stale.exists());
        assert!(!older.exists());
    }

    #[test]
    fn test_failed_delete_is_recorded_and_pruning_continues() {
        struct Stuck(PathBuf);
        impl SnapshotRemover for Stuck {
            fn remove(&self, path: &Path) -> io::Result<()> {
                if path == self.0 {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
                }
                fs::remove_file(path)
            }
        }

        let temp = TempDir::new().unwrap();
        let now = Local::now();
        let paths: Vec<_> = (0..4)
            .map(|i| write_snapshot(temp.path(), now - TimeDelta::hours(i)))
            .collect();

        let report = Pruner::new(temp.path(), pattern(), RetentionPolicy::KeepLast(1))
            .prune_with(now, &Stuck(paths[2].clone()))
            .unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            BackupError::PruneFailure { path, .. } if *path == paths[2]
        ));
        assert_eq!(report.deleted, vec![paths[1].clone(), paths[3].clone()]);
        assert!(paths[0].exists());
        assert!(paths[2].exists());
        assert!(!paths[1].exists() && !paths[3].exists());
    }

    #[test]
    fn test_keep_last_more_than_present() {
        let temp = TempDir::new().unwrap();
        let now = Local::now();
        write_snapshot(temp.path(), now);
        let report = Pruner::new(temp.path(), pattern(), RetentionPolicy::KeepLast(10))
            .prune(now)
            .unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.kept.len(), 1);
    }

    #[test]
    fn test_from_limits() {
        assert_eq!(RetentionPolicy::from_limits(None, None).unwrap(), None);
        assert_eq!(
            RetentionPolicy::from_limits(Some(2), None).unwrap(),
            Some(RetentionPolicy::KeepLast(2))
        );
        assert!(RetentionPolicy::from_limits(Some(0), None).is_err());
        assert!(RetentionPolicy::from_limits(None, Some(0)).is_err());
        assert!(RetentionPolicy::from_limits(Some(1), Some(1)).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(RetentionPolicy::KeepLast(2).to_string(), "keep-last(2)");
        assert_eq!(
            RetentionPolicy::KeepWithin(TimeDelta::days(30)).to_string(),
            "keep-within(30 days)"
        );
    }
}
