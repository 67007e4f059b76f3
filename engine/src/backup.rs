//! Backup orchestration.
//!
//! For each declared source, in order:
//! 1. Snapshot the source volume (only a synthesized label in a dry run)
//! 2. Enumerate member filesystems (descendants too if recursive)
//! 3. Per filesystem: choose a base, estimate, transfer
//! 4. Apply retention to the source volume
//!
//! The first failing source aborts the run.

use chrono::Local;
use tracing::{info, info_span, warn};

use crate::config::BackupConfig;
use crate::error::EngineError;
use crate::inventory::Inventory;
use crate::matcher;
use crate::model::{
    backup_label, BackupReport, FilesystemReport, FilesystemState, SnapshotName, Source,
    SourceReport, TransferKind,
};
use crate::pipeline::{CommandRunner, Executor};
use crate::progress::ProgressCallback;
use crate::retention;

/// A configured backup session.
pub struct Backup<R> {
    config: BackupConfig,
    executor: Executor<R>,
}

impl<R: CommandRunner> Backup<R> {
    pub fn new(config: BackupConfig, runner: R) -> Self {
        let executor = Executor::new(runner, config.dry_run);
        Backup { config, executor }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        self.executor.runner()
    }

    /// Back up every source, strictly in order.
    ///
    /// # Errors
    /// Returns the first error encountered. Sources after the failing one are
    /// not touched; work already done for earlier sources is not undone.
    pub fn run(
        &self,
        sources: &[Source],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<BackupReport, EngineError> {
        if sources.is_empty() {
            return Err(EngineError::Config("no source filesystems provided".to_string()));
        }

        let mut report = BackupReport::new(self.config.dry_run);
        let span = info_span!("backup", run = %report.id, dry_run = report.dry_run);
        let _enter = span.enter();

        for source in sources {
            let source_report = self.backup_source(source, progress)?;
            report.sources.push(source_report);
        }

        report.finished_at = Some(Local::now());
        info!(
            sources = report.sources.len(),
            filesystems = report.filesystems().count(),
            "backup run complete"
        );
        if let Some(callback) = progress {
            callback.on_run_completed(&report);
        }
        Ok(report)
    }

    fn backup_source(
        &self,
        source: &Source,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<SourceReport, EngineError> {
        let span = info_span!("source", vol = %source.volume, recurse = source.recurse);
        let _enter = span.enter();

        let inventory = Inventory::new(&self.config, &self.executor);
        let label = backup_label(Local::now().naive_local());
        if self.config.dry_run {
            info!(snapshot = %label, "dry run: would create snapshot");
        }
        let snapshot = inventory.create_snapshot(&source.volume, &label, source.recurse)?;
        if let Some(callback) = progress {
            callback.on_source_started(source, &snapshot);
        }

        let filesystems = if source.recurse {
            inventory.list_filesystems(&source.volume)?
        } else {
            vec![source.volume.clone()]
        };

        let mut reports = Vec::with_capacity(filesystems.len());
        for filesystem in &filesystems {
            reports.push(self.backup_filesystem(&inventory, filesystem, &label, progress)?);
        }

        let deleted = retention::clean_snapshots(
            &inventory,
            &source.volume,
            self.config.retain,
            source.recurse,
        )?;
        if let Some(callback) = progress {
            callback.on_cleanup_completed(source, &deleted);
        }

        Ok(SourceReport {
            source: source.clone(),
            label,
            filesystems: reports,
            deleted_snapshots: deleted,
        })
    }

    fn backup_filesystem(
        &self,
        inventory: &Inventory<'_, R>,
        filesystem: &str,
        label: &str,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<FilesystemReport, EngineError> {
        let target = self.config.target_dataset_for(filesystem);
        let snapshot = SnapshotName::new(filesystem, label);
        let kind = self.determine_base(inventory, filesystem, &target)?;

        let mut report = FilesystemReport {
            filesystem: filesystem.to_string(),
            target: target.clone(),
            snapshot: snapshot.clone(),
            kind: kind.clone(),
            estimated_bytes: None,
            state: FilesystemState::Estimated,
        };

        match inventory.estimate_send_size(&kind, &snapshot) {
            Ok(size) => {
                info!(vol = filesystem, size, "estimated backup size");
                report.estimated_bytes = Some(size);
            }
            Err(err) if self.config.dry_run => {
                // The new snapshot does not exist in a dry run, so this is expected.
                warn!(vol = filesystem, error = %err, "dry run: could not estimate backup size");
                report.state = FilesystemState::EstimateFailed;
            }
            Err(err) => return Err(err),
        }
        if let Some(callback) = progress {
            callback.on_filesystem_planned(&report);
        }

        if self.config.dry_run {
            info!(vol = filesystem, kind = %kind, target = %target, "dry run: would run backup");
        } else {
            let size = report.estimated_bytes.unwrap_or(0);
            inventory.transfer(&kind, &snapshot, &target, size)?;
            report.state = FilesystemState::Transferred;
        }

        if let Some(callback) = progress {
            callback.on_filesystem_completed(&report);
        }
        Ok(report)
    }

    /// Incremental from the newest common snapshot when the target exists and
    /// shares one; full otherwise.
    ///
    /// A matched base that the target can no longer list is an error rather
    /// than a full send, since `receive -F` would then roll the target back.
    fn determine_base(
        &self,
        inventory: &Inventory<'_, R>,
        filesystem: &str,
        target: &str,
    ) -> Result<TransferKind, EngineError> {
        if !inventory.dataset_exists(target)? {
            info!(vol = filesystem, target, "target does not exist, sending full snapshot");
            return Ok(TransferKind::Full);
        }

        match matcher::find_common_snapshot(inventory, filesystem, target) {
            Ok(base) => {
                if !inventory.snapshot_exists(target, &base.label)? {
                    warn!(
                        vol = filesystem,
                        target,
                        snap = %base,
                        "matched snapshot not found on target"
                    );
                    return Err(EngineError::NoMatchingSnapshot {
                        source_dataset: filesystem.to_string(),
                        target_dataset: target.to_string(),
                    });
                }
                info!(vol = filesystem, snap = %base, "incremental backup start");
                Ok(TransferKind::Incremental { base })
            }
            Err(EngineError::NoMatchingSnapshot { .. }) => {
                warn!(
                    vol = filesystem,
                    target,
                    "no matching snapshot on existing target, falling back to full transfer"
                );
                Ok(TransferKind::Full)
            }
            Err(err) => Err(err),
        }
    }
}
