//! dbsnap - database snapshots with retention
//!
//! Copies a database into a snapshot with one of two strategies and prunes
//! snapshots that fall outside a retention policy.
//!
//! # Architecture
//!
//! - `config`: backup configuration, settings files and the snapshot data model
//! - `error`: error types and exit codes
//! - `drivers`: copy strategies (`direct-copy`, `attach-copy`)
//! - `storage`: snapshot naming and directory listing
//! - `retention`: retention policies and the pruner
//! - `backup`: the orchestrator tying a run together
//! - `cli` / `ops`: command-line surface
//!
//! # Example
//!
//! ```rust,ignore
//! use dbsnap::backup::run_backup;
//! use dbsnap::config::{BackupConfig, Method};
//! use dbsnap::drivers::NoopObserver;
//! use dbsnap::retention::RetentionPolicy;
//!
//! let config = BackupConfig::new("analytics.db", "backups", Method::AttachCopy)
//!     .with_timestamp(true)
//!     .with_retention(RetentionPolicy::KeepLast(7));
//! let outcome = run_backup(&config, &NoopObserver)?;
//! println!("{}", outcome.snapshot.destination.display());
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod drivers;
pub mod error;
pub mod ops;
pub mod retention;
pub mod storage;
pub mod utils;

pub use error::{BackupError, BackupResult};
