//! Common snapshot matching between a source dataset and its target.

use tracing::debug;

use crate::error::EngineError;
use crate::inventory::Inventory;
use crate::model::SnapshotName;
use crate::pipeline::CommandRunner;

/// Find the newest source snapshot whose label also exists on the target.
///
/// The source list is scanned newest to oldest; the target list is only
/// tested for membership, so target-only snapshots never affect the result.
///
/// # Errors
/// Query failures propagate. Exhausting the source list yields
/// EngineError::NoMatchingSnapshot.
pub fn find_common_snapshot<R: CommandRunner>(
    inventory: &Inventory<'_, R>,
    source: &str,
    target: &str,
) -> Result<SnapshotName, EngineError> {
    let source_snaps = inventory.list_snapshots(source)?;
    let target_snaps = inventory.list_snapshots(target)?;

    for full in source_snaps.iter().rev() {
        let Ok(snapshot) = SnapshotName::parse(full) else {
            debug!(snap = %full, "skipping unparseable snapshot name");
            continue;
        };
        let wanted = snapshot.with_dataset(target).to_string();
        if target_snaps.iter().any(|t| *t == wanted) {
            debug!(source = %snapshot, target = %wanted, "found matching snapshot");
            return Ok(snapshot);
        }
    }

    Err(EngineError::NoMatchingSnapshot {
        source_dataset: source.to_string(),
        target_dataset: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupConfig;
    use crate::pipeline::Executor;
    use crate::testing::StubRunner;

    const SOURCE_LIST: &str = "zfs list -H -o name -t snapshot -s creation pool/data";
    const TARGET_LIST: &str = "zfs list -H -o name -t snapshot -s creation backup/pool/data";

    fn find(stub: &StubRunner) -> Result<SnapshotName, EngineError> {
        let config = BackupConfig::builder("backup").build().expect("Failed to build config");
        let executor = Executor::new(stub, false);
        let inventory = Inventory::new(&config, &executor);
        find_common_snapshot(&inventory, "pool/data", "backup/pool/data")
    }

    #[test]
    fn test_returns_newest_common_snapshot() {
        let stub = StubRunner::new()
            .respond(
                SOURCE_LIST,
                &["pool/data@s1", "pool/data@s2", "pool/data@s3", "pool/data@s4"],
            )
            .respond(
                TARGET_LIST,
                &[
                    "backup/pool/data@s3",
                    "backup/pool/data@s1",
                    "backup/pool/data@target-only",
                    "backup/pool/data@s2",
                ],
            );

        let found = find(&stub).expect("Expected a match");
        assert_eq!(found.to_string(), "pool/data@s3");
    }

    #[test]
    fn test_no_shared_label_is_no_match() {
        let stub = StubRunner::new()
            .respond(SOURCE_LIST, &["pool/data@a", "pool/data@b"])
            .respond(TARGET_LIST, &["backup/pool/data@c"]);

        assert!(matches!(find(&stub), Err(EngineError::NoMatchingSnapshot { .. })));
    }

    #[test]
    fn test_empty_lists_are_no_match() {
        let stub = StubRunner::new();
        assert!(matches!(find(&stub), Err(EngineError::NoMatchingSnapshot { .. })));
    }

    #[test]
    fn test_label_must_be_on_exact_target_dataset() {
        let stub = StubRunner::new()
            .respond(SOURCE_LIST, &["pool/data@a"])
            .respond(TARGET_LIST, &["backup/pool/data/child@a"]);

        assert!(find(&stub).is_err());
    }

    #[test]
    fn test_list_failure_propagates() {
        let stub = StubRunner::new()
            .respond(SOURCE_LIST, &["pool/data@a"])
            .fail(TARGET_LIST);

        match find(&stub) {
            Err(EngineError::Command { operation, .. }) => {
                assert_eq!(operation, "listing snapshots")
            }
            other => panic!("expected command error, got {:?}", other),
        }
    }
}
