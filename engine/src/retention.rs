//! Retention policy for backup snapshots.
//!
//! Only snapshots with canonical timestamp labels are counted or deleted.
//! Anything else on the dataset was made by someone else and is left alone.

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::inventory::Inventory;
use crate::model::SnapshotName;
use crate::pipeline::CommandRunner;

fn is_backup_snapshot(full: &str) -> bool {
    SnapshotName::parse(full).is_ok_and(|s| s.is_backup())
}

/// Select snapshots to delete from an oldest-first list.
///
/// The `retain` newest backup snapshots are kept (`retain` is at least 1).
/// Candidates are returned oldest first.
pub fn select_for_deletion(snapshots: &[String], retain: usize) -> Vec<String> {
    let retain = if retain < 1 {
        warn!(retain, "retain too low, retaining 1 snap");
        1
    } else {
        retain
    };
    if snapshots.len() <= retain {
        debug!(snaps = snapshots.len(), retain, "not cleaning snaps");
        return Vec::new();
    }

    let mut saved = 0;
    let mut candidates = Vec::new();
    for snap in snapshots.iter().rev() {
        if !is_backup_snapshot(snap) {
            debug!(snap = %snap, "skipping non-backup snapshot");
            continue;
        }
        if saved < retain {
            debug!(snap = %snap, "retaining snapshot");
            saved += 1;
            continue;
        }
        candidates.push(snap.clone());
    }
    candidates.reverse();
    candidates
}

/// Apply the retention policy to `dataset`.
///
/// Candidates are destroyed oldest first. The first failed destroy aborts
/// the cleanup; snapshots after it are left in place.
///
/// # Returns
/// The snapshots that were destroyed (or would be, in a dry run).
pub fn clean_snapshots<R: CommandRunner>(
    inventory: &Inventory<'_, R>,
    dataset: &str,
    retain: usize,
    recurse: bool,
) -> Result<Vec<String>, EngineError> {
    let snaps = inventory.list_snapshots(dataset)?;
    info!(vol = dataset, retain, snaps = snaps.len(), "cleaning snapshots");

    let candidates = select_for_deletion(&snaps, retain);
    let mut deleted = Vec::with_capacity(candidates.len());
    for snap in &candidates {
        if let Err(err) = inventory.destroy_snapshot(snap, recurse) {
            return Err(EngineError::Cleanup {
                dataset: dataset.to_string(),
                deleted: deleted.len(),
                candidates: candidates.len(),
                source: Box::new(err),
            });
        }
        deleted.push(snap.clone());
    }
    Ok(deleted)
}
