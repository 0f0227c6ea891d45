//! Configuration and data model

pub mod settings;
pub mod snapshot;

pub use settings::{BackupConfig, BackupSettings, Method};
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotPattern};
