use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, warn};

use crate::drivers::CopyObserver;
use crate::error::{BackupError, BackupResult, Phase};

const BUF_SIZE: usize = 64 * 1024;

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> BackupResult<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| BackupError::DestinationUnwritable {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Copy `src` to a new file at `dst`, reporting progress as bytes move.
///
/// Opens the source without any lock so a concurrently open database is
/// readable. Returns the number of bytes written.
pub fn copy_bytes(src: &Path, dst: &Path, observer: &dyn CopyObserver) -> BackupResult<u64> {
    let mut input = File::open(src).map_err(|e| open_source_error(src, e))?;
    let total = input
        .metadata()
        .map_err(|e| BackupError::io(Phase::Copy, src, e))?
        .len();

    let mut output = File::options()
        .write(true)
        .create_new(true)
        .open(dst)
        .map_err(|e| BackupError::DestinationUnwritable {
            path: dst.to_path_buf(),
            source: e,
        })?;

    let mut buf = vec![0u8; BUF_SIZE];
    let mut copied = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(partial(src, copied, total, e)),
        };
        output
            .write_all(&buf[..n])
            .map_err(|e| write_error(dst, copied, total, e))?;
        copied += n as u64;
        observer.bytes(copied, total);
    }

    output
        .sync_all()
        .map_err(|e| write_error(dst, copied, total, e))?;
    Ok(copied)
}

/// Carry modification time and permissions over to `dst`. Best effort.
pub fn preserve_metadata(src: &Path, dst: &Path) {
    let meta = match fs::metadata(src) {
        Ok(m) => m,
        Err(e) => {
            debug!("Skipping metadata preservation for {}: {}", dst.display(), e);
            return;
        }
    };
    if let Ok(modified) = meta.modified() {
        let res = File::options()
            .write(true)
            .open(dst)
            .and_then(|f| f.set_modified(modified));
        if let Err(e) = res {
            debug!("Could not preserve mtime on {}: {}", dst.display(), e);
        }
    }
    if let Err(e) = fs::set_permissions(dst, meta.permissions()) {
        debug!("Could not preserve permissions on {}: {}", dst.display(), e);
    }
}

/// Move a finished staging file onto its destination.
pub fn publish(staging: &Path, destination: &Path) -> BackupResult<()> {
    if destination.exists() {
        warn!("Overwriting existing backup: {}", destination.display());
        // rename does not replace on every platform
        if cfg!(windows) {
            fs::remove_file(destination)
                .map_err(|e| BackupError::io(Phase::Publish, destination, e))?;
        }
    }
    fs::rename(staging, destination).map_err(|e| BackupError::io(Phase::Publish, destination, e))
}

/// Remove a partial artifact, logging instead of failing.
pub fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}

fn open_source_error(src: &Path, e: io::Error) -> BackupError {
    if e.kind() == io::ErrorKind::NotFound {
        BackupError::SourceNotFound {
            path: src.to_path_buf(),
        }
    } else if is_sharing_violation(&e) {
        BackupError::SourceBusy {
            path: src.to_path_buf(),
            reason: e.to_string(),
        }
    } else {
        BackupError::io(Phase::Copy, src, e)
    }
}

fn write_error(dst: &Path, copied: u64, total: u64, e: io::Error) -> BackupError {
    match e.kind() {
        io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied => {
            BackupError::DestinationUnwritable {
                path: dst.to_path_buf(),
                source: e,
            }
        }
        _ => partial(dst, copied, total, e),
    }
}

fn partial(path: &Path, copied: u64, total: u64, e: io::Error) -> BackupError {
    BackupError::PartialByteCopy {
        path: path.to_path_buf(),
        copied,
        total,
        reason: e.to_string(),
    }
}

#[cfg(windows)]
fn is_sharing_violation(e: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(e.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_e: &io::Error) -> bool {
    false
}
