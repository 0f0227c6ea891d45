use anyhow::Result;
use clap::Parser;
use colored::*;
use log::LevelFilter;

use dbsnap::BackupError;
use dbsnap::cli::{Cli, Commands};
use dbsnap::ops;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(err) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), err);
        let code = err
            .downcast_ref::<BackupError>()
            .map(BackupError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Backup(args) => {
            ops::do_backup(&args)?;
        }
        Commands::List { dir, ext, prefix } => {
            ops::do_list(&dir, &prefix, &ext)?;
        }
        Commands::Prune {
            dir,
            retain_last,
            retain_days,
            ext,
            prefix,
            dry_run,
        } => {
            ops::do_prune(&dir, retain_last, retain_days, &prefix, &ext, dry_run)?;
        }
    }

    Ok(())
}

/// RUST_LOG sets the baseline; -v / -q override it.
fn init_logging(verbose: u8, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match (quiet, verbose) {
        (true, _) => {
            builder.filter_level(LevelFilter::Warn);
        }
        (false, 0) => {}
        (false, 1) => {
            builder.filter_level(LevelFilter::Debug);
        }
        (false, _) => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.format_timestamp_secs().init();
}
