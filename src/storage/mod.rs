//! Snapshot catalog: naming, destination resolution and directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use walkdir::WalkDir;

use crate::config::{BackupConfig, SnapshotEntry, SnapshotPattern};
use crate::error::{BackupError, BackupResult, Phase};

/// Timestamp layout embedded in snapshot names
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Pick the path the snapshot for this run will be published at.
///
/// Timestamped runs never reuse an existing name: a `-N` counter is appended
/// when a snapshot from the same second is already present.
pub fn resolve_destination(config: &BackupConfig, now: DateTime<Local>) -> BackupResult<PathBuf> {
    if !config.timestamp {
        if config.destination.is_dir() {
            return Err(BackupError::config(format!(
                "destination {} is a directory; pass --timestamp or a file path",
                config.destination.display()
            )));
        }
        return Ok(config.destination.clone());
    }

    if config.destination.exists() && !config.destination.is_dir() {
        return Err(BackupError::config(format!(
            "destination {} must be a directory when timestamping",
            config.destination.display()
        )));
    }

    let pattern = config.pattern();
    let stamp = now.format(STAMP_FORMAT).to_string();
    let mut candidate = config.destination.join(pattern.file_name(&stamp));
    let mut counter = 1u32;
    while candidate.exists() || staging_path(&candidate).exists() {
        candidate = config
            .destination
            .join(pattern.file_name(&format!("{}-{}", stamp, counter)));
        counter += 1;
    }
    Ok(candidate)
}

/// Hidden sibling a strategy writes into before the snapshot is published.
pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    destination.with_file_name(format!(".{}.partial", name))
}

/// Parse the timestamp out of a snapshot stem.
///
/// Accepts `YYYYMMDD-HHMMSS` and `YYYYMMDD-HHMMSS-N` (collision counter).
pub fn parse_snapshot_timestamp(stem: &str) -> Option<DateTime<Local>> {
    parse_snapshot_stamp(stem).map(|(ts, _)| ts)
}

/// Timestamp and collision counter of a snapshot stem; a stem without a
/// counter is the first snapshot of its second and gets 0.
pub fn parse_snapshot_stamp(stem: &str) -> Option<(DateTime<Local>, u32)> {
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let counter = match parts.get(2) {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => n.parse().ok()?,
        Some(_) => return None,
        None => 0,
    };

    let date_part = parts[0];
    let time_part = parts[1];
    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }
    if !date_part.bytes().chain(time_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let ts = NaiveDateTime::new(date, time)
        .and_local_timezone(Local)
        .earliest()?;
    Some((ts, counter))
}

/// List snapshots in `dir` matching `pattern`, newest first.
///
/// A missing directory yields an empty list. Only regular files directly in
/// `dir` are considered.
pub fn list_snapshots(dir: &Path, pattern: &SnapshotPattern) -> BackupResult<Vec<SnapshotEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            BackupError::io(Phase::List, path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = match entry.file_name().to_str() {
            Some(n) => n.to_string(),
            None => continue,
        };
        let Some(stem) = pattern.stem(&file_name) else {
            continue;
        };

        let metadata = fs::metadata(entry.path())
            .map_err(|e| BackupError::io(Phase::List, entry.path(), e))?;
        let (created_at, counter, embedded) = match parse_snapshot_stamp(stem) {
            Some((ts, counter)) => (ts, counter, true),
            None => {
                let modified = metadata
                    .modified()
                    .map_err(|e| BackupError::io(Phase::List, entry.path(), e))?;
                (DateTime::<Local>::from(modified), 0, false)
            }
        };

        entries.push(SnapshotEntry {
            path: entry.path().to_path_buf(),
            file_name,
            created_at,
            counter,
            embedded,
            size_bytes: metadata.len(),
        });
    }

    // Newest first; within one second the higher collision counter is newer
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.counter.cmp(&a.counter))
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(entries)
}
