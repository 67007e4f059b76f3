//! # zfsbackup engine
//!
//! Incremental backups of ZFS datasets into a target hierarchy, driven
//! entirely through the `zfs` command (or any command prefix that reaches
//! it, such as `ssh host zfs`).
//!
//! ## Overview
//!
//! For every declared source the engine:
//! - Creates a snapshot labelled with the current time
//! - Finds the newest snapshot shared with `target/source`, if any
//! - Estimates the stream size, then pipes `send` into `receive -F`
//! - Deletes all but the newest backup snapshots on the source
//!
//! External commands run as OS pipelines. In a dry run, queries still run
//! but nothing that changes state is executed.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{Backup, BackupConfig, ProcessRunner, Source};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::builder("backup").dry_run(true).build()?;
//! let sources = vec![Source::parse("tank/home/...")?];
//!
//! let report = Backup::new(config, ProcessRunner).run(&sources, None)?;
//! for fs in report.filesystems() {
//!     println!("{}: {:?} bytes", fs.filesystem, fs.estimated_bytes);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Sources, snapshot names, run reports
//! - **config**: Session configuration and command prefix selection
//! - **error**: Error types and handling
//! - **pipeline**: Process pipelines and the dry-run executor
//! - **inventory**: Snapshot and dataset queries and mutations
//! - **transfer**: Send/receive pipeline assembly and size estimates
//! - **matcher**: Common snapshot matching
//! - **retention**: Snapshot retention policy
//! - **backup**: Orchestration
//! - **progress**: Progress callback trait

pub mod backup;
pub mod config;
pub mod error;
pub mod inventory;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod retention;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types and functions
pub use backup::Backup;
pub use config::{BackupConfig, BackupConfigBuilder};
pub use error::EngineError;
pub use model::{
    BackupReport, FilesystemReport, FilesystemState, SnapshotName, Source, SourceReport,
    TransferKind,
};
pub use pipeline::{CommandRunner, Executor, Pipeline, PipelineOutput, ProcessRunner, Stage};
pub use progress::ProgressCallback;
pub use retention::select_for_deletion;
