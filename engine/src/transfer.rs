//! Transfer pipeline assembly and size estimates.
//!
//! A transfer is `send` on the source side, an optional progress filter, and
//! `receive -F` on the target side. The estimate is the same `send` with
//! `-n -P`, whose output carries a `size` line.

use tracing::debug;

use crate::config::BackupConfig;
use crate::error::EngineError;
use crate::model::{SnapshotName, TransferKind};
use crate::pipeline::{Pipeline, Stage};

/// Arguments for `send`, without the command prefix.
pub fn send_args(kind: &TransferKind, snapshot: &SnapshotName, estimate: bool) -> Vec<String> {
    let mut args = vec!["send".to_string()];
    if estimate {
        args.push("-n".to_string());
        args.push("-P".to_string());
    }
    if let TransferKind::Incremental { base } = kind {
        args.push("-i".to_string());
        args.push(base.to_string());
    }
    args.push(snapshot.to_string());
    args
}

/// Pipeline estimating the size of a transfer.
pub fn estimate_pipeline(
    config: &BackupConfig,
    kind: &TransferKind,
    snapshot: &SnapshotName,
) -> Result<Pipeline, EngineError> {
    let args = send_args(kind, snapshot, true);
    Pipeline::single(config.command_for(&snapshot.dataset, &args))
}

/// Extract the stream size from `send -n -P` output.
///
/// # Errors
/// A missing, unparseable or zero size is an EngineError::Estimate. Zero is
/// never read as "nothing to send".
pub fn parse_estimate(snapshot: &SnapshotName, lines: &[String]) -> Result<u64, EngineError> {
    let estimate_error = |reason: String| EngineError::Estimate {
        snapshot: snapshot.to_string(),
        reason,
    };

    for line in lines {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("size") {
            continue;
        }
        let value = fields.next().unwrap_or("");
        let size = value
            .parse::<u64>()
            .map_err(|e| estimate_error(format!("size parse error for '{}': {}", value, e)))?;
        if size == 0 {
            return Err(estimate_error("backup size 0".to_string()));
        }
        return Ok(size);
    }
    Err(estimate_error("no size reported".to_string()))
}

/// Resolve the progress filter on PATH.
///
/// Returns None when no program is configured, it cannot be found, or there
/// is no size to hint with. The transfer then runs as two stages.
pub fn progress_stage(program: Option<&str>, size: u64) -> Option<Stage> {
    let program = program?;
    if size == 0 {
        return None;
    }
    match which::which(program) {
        Ok(path) => {
            debug!(program = %path.display(), size, "using progress filter");
            Some(Stage::passthrough(vec![
                path.to_string_lossy().into_owned(),
                "-s".to_string(),
                size.to_string(),
            ]))
        }
        Err(err) => {
            debug!(program, error = %err, "progress filter not available");
            None
        }
    }
}

/// Pipeline sending `snapshot` into `target`, forcing the target forward.
pub fn transfer_pipeline(
    config: &BackupConfig,
    kind: &TransferKind,
    snapshot: &SnapshotName,
    target: &str,
    progress: Option<Stage>,
) -> Result<Pipeline, EngineError> {
    let send = config.command_for(&snapshot.dataset, &send_args(kind, snapshot, false));
    let receive = config.command_for(target, &["receive", "-F", target]);

    let mut stages = vec![Stage::new(send)];
    stages.extend(progress);
    stages.push(Stage::new(receive));
    Pipeline::new(stages)
}
