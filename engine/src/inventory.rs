//! Volume and snapshot inventory.
//!
//! Every call against the snapshot subsystem goes through here. Queries are
//! observational and always run; create, destroy and transfer are mutating
//! and go through the executor's dry-run gate.

use tracing::{debug, info};

use crate::config::BackupConfig;
use crate::error::EngineError;
use crate::model::{SnapshotName, TransferKind};
use crate::pipeline::{CommandRunner, Executor, Pipeline, Stage};
use crate::transfer;

pub struct Inventory<'a, R> {
    config: &'a BackupConfig,
    executor: &'a Executor<R>,
}

impl<'a, R: CommandRunner> Inventory<'a, R> {
    pub fn new(config: &'a BackupConfig, executor: &'a Executor<R>) -> Self {
        Inventory { config, executor }
    }

    pub fn config(&self) -> &BackupConfig {
        self.config
    }

    fn query(&self, dataset: &str, args: &[&str]) -> Result<Pipeline, EngineError> {
        Pipeline::single(self.config.command_for(dataset, args))
    }

    fn observe(&self, pipeline: &Pipeline, operation: &str) -> Result<Vec<String>, EngineError> {
        self.executor
            .observe(pipeline)
            .map_err(|e| e.in_operation(operation))?
            .into_lines(operation)
    }

    fn mutate(&self, pipeline: &Pipeline, operation: &str) -> Result<Vec<String>, EngineError> {
        self.executor
            .mutate(pipeline)
            .map_err(|e| e.in_operation(operation))?
            .into_lines(operation)
    }

    /// All snapshot full names under `dataset`, oldest first.
    pub fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>, EngineError> {
        let pipeline = self.query(
            dataset,
            &["list", "-H", "-o", "name", "-t", "snapshot", "-s", "creation", dataset],
        )?;
        self.observe(&pipeline, "listing snapshots")
    }

    /// `dataset` plus every descendant filesystem or volume.
    pub fn list_filesystems(&self, dataset: &str) -> Result<Vec<String>, EngineError> {
        let pipeline = self.query(
            dataset,
            &["list", "-H", "-o", "name", "-r", "-t", "filesystem,volume", dataset],
        )?;
        self.observe(&pipeline, "listing filesystems")
    }

    /// True if the dataset query succeeds. Any failure reads as absence.
    pub fn dataset_exists(&self, dataset: &str) -> Result<bool, EngineError> {
        let pipeline = self.query(dataset, &["list", "-H", "-t", "filesystem,volume", dataset])?;
        Ok(self.probe(&pipeline))
    }

    /// True if `dataset@label` can be listed.
    pub fn snapshot_exists(&self, dataset: &str, label: &str) -> Result<bool, EngineError> {
        let name = SnapshotName::new(dataset, label).to_string();
        let pipeline = self.query(dataset, &["list", "-H", "-t", "snapshot", name.as_str()])?;
        Ok(self.probe(&pipeline))
    }

    fn probe(&self, pipeline: &Pipeline) -> bool {
        match self.executor.observe(pipeline) {
            Ok(output) => output.success(),
            Err(err) => {
                debug!(command = %pipeline, error = %err, "probe failed");
                false
            }
        }
    }

    /// Create `volume@label`, recursively if asked.
    pub fn create_snapshot(
        &self,
        volume: &str,
        label: &str,
        recurse: bool,
    ) -> Result<SnapshotName, EngineError> {
        let snapshot = SnapshotName::new(volume, label);
        info!(vol = volume, snapshot = label, recurse, "creating snapshot");

        let name = snapshot.to_string();
        let mut args = vec!["snapshot"];
        if recurse {
            args.push("-r");
        }
        args.push(&name);

        let pipeline = self.query(volume, &args)?;
        self.mutate(&pipeline, "creating snapshot")?;
        Ok(snapshot)
    }

    /// Destroy a snapshot, recursively if asked.
    pub fn destroy_snapshot(&self, snapshot: &str, recurse: bool) -> Result<(), EngineError> {
        info!(snap = snapshot, recurse, "deleting snapshot");

        let mut args = vec!["destroy"];
        if recurse {
            args.push("-r");
        }
        args.push(snapshot);

        let pipeline = self.query(snapshot, &args)?;
        self.mutate(&pipeline, "deleting snapshot")?;
        Ok(())
    }

    /// Estimated stream size for sending `snapshot`.
    ///
    /// The estimate is an observation and runs even in a dry run.
    pub fn estimate_send_size(
        &self,
        kind: &TransferKind,
        snapshot: &SnapshotName,
    ) -> Result<u64, EngineError> {
        let pipeline = transfer::estimate_pipeline(self.config, kind, snapshot)?;
        let lines = self.observe(&pipeline, "with dry run")?;
        transfer::parse_estimate(snapshot, &lines)
    }

    /// Send `snapshot` into `target`.
    ///
    /// `size_hint` feeds the progress filter when one is configured and found.
    pub fn transfer(
        &self,
        kind: &TransferKind,
        snapshot: &SnapshotName,
        target: &str,
        size_hint: u64,
    ) -> Result<(), EngineError> {
        info!(vol = %snapshot.dataset, kind = %kind, end = %snapshot, target, "backup starting");

        let progress: Option<Stage> = if self.executor.is_dry_run() {
            None
        } else {
            transfer::progress_stage(self.config.progress_program.as_deref(), size_hint)
        };
        let pipeline = transfer::transfer_pipeline(self.config, kind, snapshot, target, progress)?;
        self.mutate(&pipeline, "during backup")?;

        info!(vol = %snapshot.dataset, end = %snapshot, target, "backup complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubRunner;

    fn config() -> BackupConfig {
        BackupConfig::builder("backup")
            .target_command(vec!["remote-zfs".to_string()])
            .progress_program(None)
            .build()
            .expect("Failed to build config")
    }

    #[test]
    fn test_list_snapshots_uses_creation_order_query() {
        let stub = StubRunner::new().respond(
            "zfs list -H -o name -t snapshot -s creation pool/data",
            &["pool/data@a", "pool/data@b"],
        );
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        let snaps = inventory.list_snapshots("pool/data").expect("Failed to list");
        assert_eq!(snaps, vec!["pool/data@a", "pool/data@b"]);
    }

    #[test]
    fn test_target_queries_use_target_prefix() {
        let stub = StubRunner::new();
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        inventory.list_snapshots("backup/pool/data").expect("Failed to list");
        assert_eq!(
            stub.calls(),
            vec!["remote-zfs list -H -o name -t snapshot -s creation backup/pool/data"]
        );
    }

    #[test]
    fn test_list_failure_is_wrapped() {
        let stub = StubRunner::new().fail("zfs list -H -o name -t snapshot -s creation pool/gone");
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        let err = inventory.list_snapshots("pool/gone").unwrap_err();
        assert!(err.to_string().starts_with("error listing snapshots"));
    }

    #[test]
    fn test_existence_probes_treat_failure_as_absent() {
        let stub = StubRunner::new()
            .fail("remote-zfs list -H -t filesystem,volume backup/pool/data")
            .fail("zfs list -H -t snapshot pool/data@missing");
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        assert!(!inventory.dataset_exists("backup/pool/data").expect("probe"));
        assert!(inventory.dataset_exists("pool/data").expect("probe"));
        assert!(!inventory.snapshot_exists("pool/data", "missing").expect("probe"));
        assert!(inventory.snapshot_exists("pool/data", "present").expect("probe"));
    }

    #[test]
    fn test_mutations_skipped_in_dry_run() {
        let stub = StubRunner::new();
        let config = config();
        let executor = Executor::new(&stub, true);
        let inventory = Inventory::new(&config, &executor);

        let snap = inventory
            .create_snapshot("pool/data", "2024-01-01T00:00:00", true)
            .expect("Dry run create should succeed");
        assert_eq!(snap.to_string(), "pool/data@2024-01-01T00:00:00");
        inventory
            .destroy_snapshot("pool/data@2023-01-01T00:00:00", true)
            .expect("Dry run destroy should succeed");
        inventory
            .transfer(&TransferKind::Full, &snap, "backup/pool/data", 10)
            .expect("Dry run transfer should succeed");

        assert!(stub.calls().is_empty());
    }

    #[test]
    fn test_create_and_destroy_argv() {
        let stub = StubRunner::new();
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        inventory
            .create_snapshot("pool/data", "2024-01-01T00:00:00", true)
            .expect("Failed to create");
        inventory
            .create_snapshot("pool/home", "2024-01-01T00:00:00", false)
            .expect("Failed to create");
        inventory
            .destroy_snapshot("pool/data@2023-01-01T00:00:00", true)
            .expect("Failed to destroy");

        assert_eq!(
            stub.calls(),
            vec![
                "zfs snapshot -r pool/data@2024-01-01T00:00:00",
                "zfs snapshot pool/home@2024-01-01T00:00:00",
                "zfs destroy -r pool/data@2023-01-01T00:00:00",
            ]
        );
    }

    #[test]
    fn test_estimate_send_size_parses_output() {
        let stub = StubRunner::new().respond(
            "zfs send -n -P pool/data@2024-01-01T00:00:00",
            &["full\tpool/data@2024-01-01T00:00:00\t2048", "size\t2048"],
        );
        let config = config();
        let executor = Executor::new(&stub, true);
        let inventory = Inventory::new(&config, &executor);

        let snap = SnapshotName::new("pool/data", "2024-01-01T00:00:00");
        let size = inventory
            .estimate_send_size(&TransferKind::Full, &snap)
            .expect("Failed to estimate");
        assert_eq!(size, 2048);
    }

    #[test]
    fn test_transfer_failure_reports_stage() {
        let stub = StubRunner::new().fail("zfs send pool/data@b | remote-zfs receive -F backup/pool/data");
        let config = config();
        let executor = Executor::new(&stub, false);
        let inventory = Inventory::new(&config, &executor);

        let snap = SnapshotName::new("pool/data", "b");
        let err = inventory
            .transfer(&TransferKind::Full, &snap, "backup/pool/data", 10)
            .unwrap_err();
        assert!(err.to_string().starts_with("error during backup"));
        assert_eq!(err.failed_stage(), Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_unstartable_command_names_the_operation() {
        let config = BackupConfig::builder("backup")
            .source_command(vec!["/nonexistent/zfsbackup-test-zfs".to_string()])
            .progress_program(None)
            .build()
            .expect("Failed to build config");
        let executor = Executor::new(crate::pipeline::ProcessRunner, false);
        let inventory = Inventory::new(&config, &executor);

        let err = inventory
            .create_snapshot("pool/data", "2024-01-01T00:00:00", false)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("error creating snapshot: "), "got: {}", msg);
        assert!(msg.contains("/nonexistent/zfsbackup-test-zfs"));
        assert_eq!(err.failed_stage(), Some(0));

        let err = inventory.list_snapshots("pool/data").unwrap_err();
        assert!(err.to_string().starts_with("error listing snapshots: "));
    }
}
