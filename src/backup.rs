//! Backup orchestration
//!
//! One run resolves the destination, hands the copy to a [`CopyStrategy`]
//! writing into a staging file, optionally verifies it, publishes it and then
//! prunes old snapshots. A failed run leaves no partial artifact behind and a
//! previous snapshot at the same path untouched.

use std::fs;
use std::path::Path;

use chrono::Local;
use log::{error, info, warn};

use crate::config::{BackupConfig, Snapshot};
use crate::drivers::selector::select_strategy;
use crate::drivers::{CopyObserver, CopyStrategy};
use crate::error::{BackupError, BackupResult, Phase};
use crate::retention::{FsRemover, PruneReport, Pruner, RetentionPolicy, SnapshotRemover};
use crate::storage;
use crate::utils::io;

/// Result of a successful run
#[derive(Debug)]
pub struct BackupOutcome {
    pub snapshot: Snapshot,
    /// Present when a retention policy was configured
    pub prune: Option<PruneReport>,
}

/// Run a backup with the strategy named in `config`.
pub fn run_backup(config: &BackupConfig, observer: &dyn CopyObserver) -> BackupResult<BackupOutcome> {
    Backup::new(config).run(observer)
}

/// One configured backup run
pub struct Backup<'a> {
    config: &'a BackupConfig,
    strategy: Box<dyn CopyStrategy + 'a>,
    remover: Box<dyn SnapshotRemover + 'a>,
}

impl<'a> Backup<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        Self {
            config,
            strategy: select_strategy(config),
            remover: Box::new(FsRemover),
        }
    }

    /// Copy with `strategy` instead of the one `config.method` selects.
    pub fn strategy(mut self, strategy: impl CopyStrategy + 'a) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Delete expired snapshots through `remover`.
    pub fn remover(mut self, remover: impl SnapshotRemover + 'a) -> Self {
        self.remover = Box::new(remover);
        self
    }

    pub fn run(&self, observer: &dyn CopyObserver) -> BackupResult<BackupOutcome> {
        let config = self.config;
        let strategy = self.strategy.as_ref();
        config.validate()?;
        check_source(&config.source)?;

        let started = Local::now();
        let destination = storage::resolve_destination(config, started)?;
        if let Some(parent) = destination.parent() {
            io::ensure_dir(parent)?;
        }
        if same_file(&config.source, &destination) {
            return Err(BackupError::config(format!(
                "destination {} is the source database",
                destination.display()
            )));
        }

        info!(
            "Backing up {} -> {} ({})",
            config.source.display(),
            destination.display(),
            strategy.method()
        );

        let staging = storage::staging_path(&destination);
        io::discard(&staging);

        let result = strategy
            .copy(&config.source, &staging, observer)
            .and_then(|()| {
                if config.verify {
                    strategy.verify(&config.source, &staging)
                } else {
                    Ok(())
                }
            })
            .and_then(|()| io::publish(&staging, &destination));
        if let Err(e) = result {
            error!("Backup of {} failed: {}", config.source.display(), e);
            io::discard(&staging);
            return Err(e);
        }

        let size_bytes = fs::metadata(&destination)
            .map_err(|e| BackupError::io(Phase::Publish, &destination, e))?
            .len();
        let snapshot = Snapshot {
            source: config.source.clone(),
            destination,
            created_at: started,
            method: strategy.method(),
            size_bytes,
        };

        let prune = config.retention.map(|policy| self.prune(&snapshot, policy));
        Ok(BackupOutcome { snapshot, prune })
    }

    /// Retention pass after a published snapshot; the snapshot itself is
    /// never a candidate.
    fn prune(&self, snapshot: &Snapshot, policy: RetentionPolicy) -> PruneReport {
        let pattern = self.config.pattern();
        let managed = snapshot
            .destination
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| pattern.matches(n));
        if !managed {
            info!(
                "{} does not follow the {}*.{} naming, retention leaves it alone",
                snapshot.destination.display(),
                pattern.prefix,
                pattern.extension
            );
        }

        let pruner = Pruner::new(self.config.snapshot_dir(), pattern, policy)
            .protect(&snapshot.destination);
        info!("Applying retention {} in {}", policy, pruner.dir().display());
        let report = pruner
            .prune_with(Local::now(), self.remover.as_ref())
            .unwrap_or_else(|e| {
                warn!("Retention pass failed: {}", e);
                PruneReport::from_failure(e)
            });
        if !report.is_clean() {
            warn!(
                "{} snapshot(s) could not be pruned; the backup itself succeeded",
                report.failures.len()
            );
        }
        report
    }
}

fn check_source(source: &Path) -> BackupResult<()> {
    match fs::metadata(source) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(BackupError::config(format!(
            "source {} is not a file",
            source.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackupError::SourceNotFound {
            path: source.to_path_buf(),
        }),
        Err(e) => Err(BackupError::io(Phase::Resolve, source, e)),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
