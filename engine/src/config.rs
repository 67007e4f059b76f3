//! Backup session configuration.
//!
//! A `BackupConfig` is built once, validated, and then only read. Every
//! component borrows it; nothing mutates it during a run.

use crate::error::EngineError;

/// Default command used to reach the snapshot subsystem on either side.
pub const DEFAULT_COMMAND: &str = "zfs";

/// Default number of backup snapshots kept on the source after cleanup.
pub const DEFAULT_RETAIN: usize = 2;

/// Default progress filter spliced into transfer pipelines.
pub const DEFAULT_PROGRESS_PROGRAM: &str = "pv";

/// Immutable configuration for a backup session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Dataset under which every source filesystem is received
    pub target_root: String,

    /// Skip mutating commands, log what would run instead
    pub dry_run: bool,

    /// Argv prefix for commands addressing source datasets
    pub source_command: Vec<String>,

    /// Argv prefix for commands addressing target datasets
    pub target_command: Vec<String>,

    /// Backup snapshots kept on the source after a transfer
    pub retain: usize,

    /// Progress filter program resolved on PATH, if any
    pub progress_program: Option<String>,
}

impl BackupConfig {
    pub fn builder(target_root: impl Into<String>) -> BackupConfigBuilder {
        BackupConfigBuilder {
            target_root: target_root.into(),
            dry_run: false,
            source_command: vec![DEFAULT_COMMAND.to_string()],
            target_command: vec![DEFAULT_COMMAND.to_string()],
            retain: DEFAULT_RETAIN,
            progress_program: Some(DEFAULT_PROGRESS_PROGRAM.to_string()),
        }
    }

    /// True if `path` lives under the target root.
    pub fn is_target_dataset(&self, path: &str) -> bool {
        path.strip_prefix(self.target_root.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Build an argv for `path`, choosing the source or target prefix.
    pub fn command_for<S: AsRef<str>>(&self, path: &str, args: &[S]) -> Vec<String> {
        let prefix = if self.is_target_dataset(path) {
            &self.target_command
        } else {
            &self.source_command
        };
        prefix
            .iter()
            .cloned()
            .chain(args.iter().map(|a| a.as_ref().to_string()))
            .collect()
    }

    /// The dataset a source filesystem is received into.
    pub fn target_dataset_for(&self, filesystem: &str) -> String {
        format!("{}/{}", self.target_root, filesystem)
    }
}

/// Builder for `BackupConfig`; `build` validates.
#[derive(Debug, Clone)]
pub struct BackupConfigBuilder {
    target_root: String,
    dry_run: bool,
    source_command: Vec<String>,
    target_command: Vec<String>,
    retain: usize,
    progress_program: Option<String>,
}

impl BackupConfigBuilder {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn source_command(mut self, command: Vec<String>) -> Self {
        self.source_command = command;
        self
    }

    pub fn target_command(mut self, command: Vec<String>) -> Self {
        self.target_command = command;
        self
    }

    pub fn retain(mut self, retain: usize) -> Self {
        self.retain = retain;
        self
    }

    pub fn progress_program(mut self, program: Option<String>) -> Self {
        self.progress_program = program;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    /// Returns EngineError::Config for an empty target root or command prefix,
    /// or a retain count of zero.
    pub fn build(self) -> Result<BackupConfig, EngineError> {
        let target_root = self.target_root.trim().trim_end_matches('/').to_string();
        if target_root.is_empty() {
            return Err(EngineError::Config("target filesystem cannot be empty".to_string()));
        }
        if target_root.contains('@') {
            return Err(EngineError::Config(format!(
                "target filesystem '{}' must not name a snapshot",
                target_root
            )));
        }
        if self.source_command.is_empty() || self.source_command[0].is_empty() {
            return Err(EngineError::Config("source command cannot be empty".to_string()));
        }
        if self.target_command.is_empty() || self.target_command[0].is_empty() {
            return Err(EngineError::Config("target command cannot be empty".to_string()));
        }
        if self.retain == 0 {
            return Err(EngineError::Config(
                "at least one backup snapshot must be retained".to_string(),
            ));
        }

        Ok(BackupConfig {
            target_root,
            dry_run: self.dry_run,
            source_command: self.source_command,
            target_command: self.target_command,
            retain: self.retain,
            progress_program: self.progress_program.filter(|p| !p.is_empty()),
        })
    }
}
