//! Core data model for backup runs.
//!
//! This module defines the value types shared by every stage of a run:
//! - Source: a volume declared for backup, optionally recursive
//! - SnapshotName: a parsed `dataset@label` pair
//! - TransferKind: full or incremental transfer
//! - BackupReport, SourceReport, FilesystemReport: what a run did

use chrono::{DateTime, Local, NaiveDateTime};
use std::fmt;
use uuid::Uuid;

use crate::error::EngineError;

/// Format of the labels this system gives its own snapshots.
pub const LABEL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Suffix on a source spec that marks it recursive.
pub const RECURSE_MARKER: &str = "/...";

/// Format a canonical backup label for the given instant.
pub fn backup_label(at: NaiveDateTime) -> String {
    at.format(LABEL_FORMAT).to_string()
}

/// Parse a label as a canonical backup timestamp.
///
/// Returns None for foreign labels.
pub fn parse_backup_label(label: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(label, LABEL_FORMAT).ok()
}

/// A volume declared for backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Dataset path of the volume
    pub volume: String,

    /// Whether descendant filesystems are backed up too
    pub recurse: bool,
}

impl Source {
    /// Parse a source spec such as `pool/data` or `pool/data/...`.
    pub fn parse(spec: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidSource {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = spec.trim();
        let (volume, recurse) = match trimmed.strip_suffix(RECURSE_MARKER) {
            Some(volume) => (volume, true),
            None => (trimmed, false),
        };
        let volume = volume.trim_end_matches('/');

        if volume.is_empty() {
            return Err(invalid("volume is empty"));
        }
        if volume.contains('@') {
            return Err(invalid("volume must not name a snapshot"));
        }

        Ok(Source {
            volume: volume.to_string(),
            recurse,
        })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.recurse {
            write!(f, "{}{}", self.volume, RECURSE_MARKER)
        } else {
            write!(f, "{}", self.volume)
        }
    }
}

/// A snapshot full name split into its dataset and label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    pub dataset: String,
    pub label: String,
}

impl SnapshotName {
    pub fn new(dataset: impl Into<String>, label: impl Into<String>) -> Self {
        SnapshotName {
            dataset: dataset.into(),
            label: label.into(),
        }
    }

    /// Parse a full name. Exactly one `@` with non-empty halves is required.
    pub fn parse(full: &str) -> Result<Self, EngineError> {
        match full.split_once('@') {
            Some((dataset, label))
                if !dataset.is_empty() && !label.is_empty() && !label.contains('@') =>
            {
                Ok(SnapshotName::new(dataset, label))
            }
            _ => Err(EngineError::InvalidSnapshotName(full.to_string())),
        }
    }

    /// True if the label is a canonical backup timestamp.
    pub fn is_backup(&self) -> bool {
        parse_backup_label(&self.label).is_some()
    }

    /// The same label on another dataset.
    pub fn with_dataset(&self, dataset: &str) -> SnapshotName {
        SnapshotName::new(dataset, self.label.clone())
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.dataset, self.label)
    }
}

/// How a filesystem is transferred to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    /// The entire snapshot is sent
    Full,
    /// Only the delta from `base` is sent
    Incremental { base: SnapshotName },
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Full => write!(f, "full"),
            TransferKind::Incremental { base } => write!(f, "incremental from {}", base),
        }
    }
}

/// Outcome of one filesystem within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemState {
    /// Size estimated; no transfer attempted (dry run)
    Estimated,
    /// Estimate failed during a dry run and was skipped
    EstimateFailed,
    /// Transfer pipeline completed
    Transferred,
}

impl FilesystemState {
    pub fn is_transferred(&self) -> bool {
        matches!(self, FilesystemState::Transferred)
    }
}

/// What happened to one filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemReport {
    /// Source filesystem path
    pub filesystem: String,

    /// Dataset the filesystem is received into
    pub target: String,

    /// The snapshot created for this run
    pub snapshot: SnapshotName,

    pub kind: TransferKind,

    /// Estimated stream size in bytes, if the estimate succeeded
    pub estimated_bytes: Option<u64>,

    pub state: FilesystemState,
}

/// What happened to one declared source.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: Source,

    /// Label of the snapshot created (or synthesized, in a dry run)
    pub label: String,

    pub filesystems: Vec<FilesystemReport>,

    /// Snapshots destroyed (or selected, in a dry run) by retention cleanup
    pub deleted_snapshots: Vec<String>,
}

/// Summary of a whole backup run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Unique identifier for this run
    pub id: Uuid,

    pub dry_run: bool,

    pub started_at: DateTime<Local>,

    pub finished_at: Option<DateTime<Local>>,

    pub sources: Vec<SourceReport>,
}

impl BackupReport {
    pub fn new(dry_run: bool) -> Self {
        BackupReport {
            id: Uuid::new_v4(),
            dry_run,
            started_at: Local::now(),
            finished_at: None,
            sources: Vec::new(),
        }
    }

    /// All filesystem reports across sources, in processing order.
    pub fn filesystems(&self) -> impl Iterator<Item = &FilesystemReport> {
        self.sources.iter().flat_map(|s| s.filesystems.iter())
    }

    /// Sum of the successful estimates.
    pub fn total_estimated_bytes(&self) -> u64 {
        self.filesystems().filter_map(|f| f.estimated_bytes).sum()
    }
}
