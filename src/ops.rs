use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::Local;
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::backup::run_backup;
use crate::cli::BackupArgs;
use crate::config::{BackupSettings, SnapshotPattern};
use crate::drivers::CopyObserver;
use crate::error::BackupResult;
use crate::retention::{PruneReport, Pruner, RetentionPolicy};
use crate::storage;

/// Progress reporting through the command-line spinner
struct Spinner(ProgressBar);

impl CopyObserver for Spinner {
    fn table(&self, name: &str, index: usize, total: usize) -> BackupResult<()> {
        self.0
            .set_message(format!("Copying table {} ({}/{})", name, index + 1, total));
        Ok(())
    }

    fn bytes(&self, copied: u64, total: u64) {
        self.0
            .set_message(format!("Copied {} of {}", HumanBytes(copied), HumanBytes(total)));
    }
}

pub fn do_backup(args: &BackupArgs) -> Result<()> {
    let file_settings = match &args.config {
        Some(path) => BackupSettings::load(path)?,
        None => BackupSettings::default(),
    };
    let config = file_settings.overlay(args.settings()).resolve()?;

    let spinner = Spinner(create_progress_bar("Creating snapshot"));
    let result = run_backup(&config, &spinner);
    spinner.0.finish_and_clear();
    let outcome = result?;

    let snapshot = &outcome.snapshot;
    eprintln!(
        "{} {}",
        "✔".green().bold(),
        format!(
            "Snapshot written via {} ({})",
            snapshot.method,
            HumanBytes(snapshot.size_bytes)
        )
        .green()
    );
    if let Some(report) = &outcome.prune {
        print_prune_report(report);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        println!("{}", snapshot.destination.display());
    }
    Ok(())
}

pub fn do_list(dir: &Path, prefix: &str, ext: &str) -> Result<()> {
    let pattern = SnapshotPattern::new(prefix, ext);
    let entries = storage::list_snapshots(dir, &pattern)?;

    if entries.is_empty() {
        println!("{} {}", "i".yellow().bold(), "No snapshots found".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Timestamp").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
            Cell::new("Dated by").add_attribute(Attribute::Bold),
        ]);

    for e in &entries {
        let ts = e.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
        table.add_row(vec![
            Cell::new(&e.file_name),
            Cell::new(ts),
            Cell::new(HumanBytes(e.size_bytes).to_string()),
            Cell::new(if e.embedded { "name" } else { "mtime" }),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn do_prune(
    dir: &Path,
    retain_last: Option<usize>,
    retain_days: Option<i64>,
    prefix: &str,
    ext: &str,
    dry_run: bool,
) -> Result<()> {
    let policy = RetentionPolicy::from_limits(retain_last, retain_days)?
        .ok_or_else(|| anyhow!("a retention policy is required (--retain-last or --retain-days)"))?;
    let pruner = Pruner::new(dir, SnapshotPattern::new(prefix, ext), policy).dry_run(dry_run);

    let bar = create_progress_bar("Pruning snapshots");
    let result = pruner.prune(Local::now());
    bar.finish_and_clear();
    let report = result?;

    print_prune_report(&report);
    if let Some(first) = report.failures.into_iter().next() {
        return Err(first.into());
    }
    Ok(())
}

fn print_prune_report(report: &PruneReport) {
    let verb = if report.dry_run { "Would prune" } else { "Pruned" };
    for path in &report.deleted {
        eprintln!("{} {} {}", "-".cyan().bold(), verb.cyan(), path.display());
    }
    for failure in &report.failures {
        eprintln!("{} {}: {}", "!".yellow().bold(), "Warning".yellow(), failure);
    }
    eprintln!(
        "{} {}",
        "i".yellow().bold(),
        format!(
            "{} {} snapshot(s), kept {}",
            verb,
            report.deleted.len(),
            report.kept.len()
        )
        .yellow()
    );
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}
