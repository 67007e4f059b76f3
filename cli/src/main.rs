//! zfsbackup - Command-line interface for the backup engine.
//!
//! Parses arguments, sets up logging, and reports run progress on stderr.

mod logging;

use clap::Parser;
use std::time::Instant;
use engine::{
    Backup, BackupConfig, BackupReport, FilesystemReport, FilesystemState, ProcessRunner,
    ProgressCallback, SnapshotName, Source,
};

/// zfsbackup - Back up ZFS filesystems
#[derive(Parser, Debug)]
#[command(name = "zfsbackup")]
#[command(version)]
#[command(about = "Back up ZFS filesystems incrementally to target ZFS filesystems")]
struct Args {
    /// Source filesystems; append "/..." to include descendants
    #[arg(value_name = "SOURCE", required = true)]
    sources: Vec<String>,

    /// Target filesystem
    #[arg(short = 't', long, value_name = "FS", default_value = "backup")]
    target_fs: String,

    /// Perform a trial run with no changes made
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Enable debug output
    #[arg(short = 'd', long)]
    debug: bool,

    /// Source ZFS command
    #[arg(short = 'S', long, value_name = "COMMAND", default_value = "zfs")]
    source_command: String,

    /// Target ZFS command
    #[arg(short = 'T', long, value_name = "COMMAND", default_value = "zfs")]
    target_command: String,

    /// Backup snapshots to keep on each source
    #[arg(long, value_name = "COUNT", default_value_t = 2)]
    retain: usize,

    /// Do not insert a progress display into transfers
    #[arg(long)]
    no_progress: bool,
}

/// CLI implementation of ProgressCallback
struct CliProgress {
    target_root: String,
    dry_run: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(target_root: &str, dry_run: bool) -> Self {
        CliProgress {
            target_root: target_root.to_string(),
            dry_run,
            start_time: Instant::now(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
        if bytes < 1024 {
            return format!("{} B", bytes);
        }
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn describe_size(fs: &FilesystemReport) -> String {
        match fs.estimated_bytes {
            Some(bytes) => Self::format_bytes(bytes),
            None => "size unknown".to_string(),
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_source_started(&self, source: &Source, snapshot: &SnapshotName) {
        eprintln!("Backing up {} to {}", source, self.target_root);
        eprintln!("  Snapshot: {}", snapshot);
    }

    fn on_filesystem_planned(&self, fs: &FilesystemReport) {
        eprintln!(
            "  {} -> {} ({}, {})",
            fs.filesystem,
            fs.target,
            fs.kind,
            Self::describe_size(fs)
        );
    }

    fn on_filesystem_completed(&self, fs: &FilesystemReport) {
        let status = match fs.state {
            FilesystemState::Transferred => "Done",
            FilesystemState::Estimated => "Would transfer",
            FilesystemState::EstimateFailed => "Would transfer (no estimate)",
        };
        eprintln!("  {}: {}", status, fs.filesystem);
    }

    fn on_cleanup_completed(&self, source: &Source, deleted: &[String]) {
        if deleted.is_empty() {
            return;
        }
        let verb = if self.dry_run { "Would remove" } else { "Removed" };
        eprintln!("  {} {} old snapshot(s) of {}", verb, deleted.len(), source.volume);
        for snap in deleted {
            eprintln!("    {}", snap);
        }
    }

    fn on_run_completed(&self, report: &BackupReport) {
        eprintln!();
        if report.dry_run {
            eprintln!("Dry run complete, nothing was changed.");
        } else {
            eprintln!("Backup complete!");
        }

        let transferred = report
            .filesystems()
            .filter(|fs| fs.state.is_transferred())
            .count();
        let deleted: usize = report.sources.iter().map(|s| s.deleted_snapshots.len()).sum();

        eprintln!(
            "Summary: {} source(s), {} filesystem(s), {} transferred, {} snapshot(s) cleaned",
            report.sources.len(),
            report.filesystems().count(),
            transferred,
            deleted
        );
        eprintln!(
            "Estimated size: {}",
            Self::format_bytes(report.total_estimated_bytes())
        );
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

/// Parse arguments, set up logging, then run the backup
fn main() {
    let args = Args::parse();

    logging::init(if args.debug { "debug" } else { "info" });

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    let sources = args
        .sources
        .iter()
        .map(|spec| Source::parse(spec))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let split = |command: &str| -> Vec<String> {
        command.split_whitespace().map(str::to_string).collect()
    };

    let mut builder = BackupConfig::builder(args.target_fs.as_str())
        .dry_run(args.dry_run)
        .source_command(split(&args.source_command))
        .target_command(split(&args.target_command))
        .retain(args.retain);
    if args.no_progress {
        builder = builder.progress_program(None);
    }
    let config = builder.build().map_err(|e| e.to_string())?;

    let progress = CliProgress::new(&config.target_root, config.dry_run);
    let backup = Backup::new(config, ProcessRunner);

    backup
        .run(&sources, Some(&progress))
        .map_err(|e| format!("Backup failed: {}", e))?;

    Ok(())
}
