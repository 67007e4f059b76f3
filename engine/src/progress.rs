//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the backup
//! engine from whatever presents a run to the operator.

use crate::model::{BackupReport, FilesystemReport, Source, SnapshotName};

/// Receives progress updates from a backup run.
///
/// All methods are called synchronously, in processing order, from the
/// thread driving the run.
pub trait ProgressCallback: Send {
    /// Called after a source's snapshot was created (or its label synthesized).
    fn on_source_started(&self, source: &Source, snapshot: &SnapshotName);

    /// Called once a filesystem's base and size estimate are known.
    fn on_filesystem_planned(&self, filesystem: &FilesystemReport);

    /// Called when a filesystem is done (transferred, or estimated in a dry run).
    fn on_filesystem_completed(&self, filesystem: &FilesystemReport);

    /// Called after retention cleanup for a source.
    fn on_cleanup_completed(&self, source: &Source, deleted: &[String]);

    /// Called when every source has been processed.
    fn on_run_completed(&self, report: &BackupReport);
}
