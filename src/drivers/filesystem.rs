use std::path::Path;

use log::{info, warn};

use super::{CopyObserver, CopyStrategy};
use crate::config::Method;
use crate::error::{BackupError, BackupResult, Phase};
use crate::utils::{hash, io};

/// Byte-for-byte copy of the database file.
pub struct DirectCopy;

impl CopyStrategy for DirectCopy {
    fn method(&self) -> Method { Method::DirectCopy }

    fn copy(&self, source: &Path, staging: &Path, observer: &dyn CopyObserver) -> BackupResult<()> {
        info!("Starting file-based backup: {}", source.display());

        let wal = wal_sidecar(source);
        if wal.exists() {
            warn!(
                "{} has a write-ahead log; uncheckpointed changes are not in the copied file",
                source.display()
            );
        }

        let bytes = io::copy_bytes(source, staging, observer)?;
        io::preserve_metadata(source, staging);

        info!("File-based backup completed: {:.2} MB", megabytes(bytes));
        Ok(())
    }

    fn verify(&self, source: &Path, staging: &Path) -> BackupResult<()> {
        let expected =
            hash::sha256_file(source).map_err(|e| BackupError::io(Phase::Verify, source, e))?;
        let actual =
            hash::sha256_file(staging).map_err(|e| BackupError::io(Phase::Verify, staging, e))?;
        if expected != actual {
            return Err(BackupError::VerificationFailed {
                path: staging.to_path_buf(),
                reason: format!("sha256 {} does not match source {}", actual, expected),
            });
        }
        Ok(())
    }
}

fn wal_sidecar(source: &Path) -> std::path::PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push("-wal");
    name.into()
}

pub(crate) fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
