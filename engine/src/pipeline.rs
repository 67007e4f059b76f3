//! Pipeline execution module.
//!
//! Runs one command, or a chain of commands connected stdout to stdin, and
//! reports the terminal stage's output together with every stage failure.
//!
//! - `Pipeline` / `Stage`: validated stage descriptors
//! - `CommandRunner`: the seam between the engine and real processes
//! - `ProcessRunner`: std::process implementation
//! - `Executor`: routes observational and mutating calls, honouring dry run

use std::fmt;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use crate::error::EngineError;

/// Where a stage's diagnostic stream goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Collected and reported with the stage's failure
    Capture,
    /// Passed straight through to the operator's console
    Inherit,
}

/// One command in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub stderr: StderrMode,
}

impl Stage {
    pub fn new(argv: Vec<String>) -> Self {
        Stage {
            argv,
            stderr: StderrMode::Capture,
        }
    }

    /// A stage whose stderr goes to the console, used for progress filters.
    pub fn passthrough(argv: Vec<String>) -> Self {
        Stage {
            argv,
            stderr: StderrMode::Inherit,
        }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// An ordered, non-empty chain of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline.
    ///
    /// # Errors
    /// Returns EngineError::Config if there are no stages or any stage has an
    /// empty argv. No process is started in that case.
    pub fn new(stages: Vec<Stage>) -> Result<Self, EngineError> {
        if stages.is_empty() {
            return Err(EngineError::Config(
                "pipeline needs at least one command".to_string(),
            ));
        }
        for (index, stage) in stages.iter().enumerate() {
            if stage.program().is_empty() {
                return Err(EngineError::Config(format!(
                    "empty command in pipeline stage {}",
                    index
                )));
            }
        }
        Ok(Pipeline { stages })
    }

    pub fn single(argv: Vec<String>) -> Result<Self, EngineError> {
        Self::new(vec![Stage::new(argv)])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", stage.argv.join(" "))?;
        }
        Ok(())
    }
}

/// A stage that exited unsuccessfully or could not be waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// 0-based position in start order
    pub stage: usize,
    pub program: String,
    /// Exit status or wait error
    pub reason: String,
    /// Captured stderr of this stage, if any
    pub diagnostic: String,
}

impl StageFailure {
    fn summary(&self) -> String {
        format!("command {} ({}) failed: {}", self.stage, self.program, self.reason)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.diagnostic.is_empty() {
            write!(f, "{}", self.summary())
        } else {
            write!(f, "{}: {}", self.summary(), self.diagnostic)
        }
    }
}

/// Result of running a pipeline to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Terminal stage stdout, split on newlines, trailing newline trimmed
    pub stdout: Vec<String>,
    /// Terminal stage stderr, trimmed
    pub stderr: String,
    /// Every failing stage, in start order
    pub failures: Vec<StageFailure>,
}

impl PipelineOutput {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&StageFailure> {
        self.failures.first()
    }

    /// Diagnostic text for the run: the terminal stage's stderr followed by
    /// the first failure, or the first failure's own text when the terminal
    /// stage printed nothing.
    pub fn diagnostic(&self) -> String {
        let Some(failure) = self.first_failure() else {
            return self.stderr.clone();
        };
        if self.stderr.is_empty() {
            failure.to_string()
        } else {
            format!("{}: {}", self.stderr, failure.summary())
        }
    }

    /// Apply first-failure-wins and wrap any failure with `operation`.
    pub fn into_lines(self, operation: &str) -> Result<Vec<String>, EngineError> {
        let Some(stage) = self.first_failure().map(|f| f.stage) else {
            return Ok(self.stdout);
        };
        Err(EngineError::Command {
            operation: operation.to_string(),
            stage,
            detail: self.diagnostic(),
        })
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\n');
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').map(str::to_string).collect()
}

/// Executes pipelines. Implemented by `ProcessRunner` and by test doubles.
pub trait CommandRunner {
    fn run(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError> {
        (**self).run(pipeline)
    }
}

/// Runs pipelines as real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

struct Started {
    child: Child,
    program: String,
    stderr_reader: Option<JoinHandle<String>>,
}

impl Started {
    fn collect_stderr(&mut self) -> String {
        self.stderr_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
    }
}

fn drain_stderr<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).trim().to_string()
    })
}

fn reap(started: Vec<Started>) {
    for mut stage in started {
        let _ = stage.child.wait();
        stage.collect_stderr();
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError> {
        debug!(pipeline = %pipeline, "running pipeline");

        let last = pipeline.len() - 1;
        let mut started: Vec<Started> = Vec::with_capacity(pipeline.len());
        let mut upstream: Option<ChildStdout> = None;

        // Start every stage before waiting on any of them.
        for (index, stage) in pipeline.stages().iter().enumerate() {
            let mut command = Command::new(stage.program());
            command.args(&stage.argv[1..]);
            command.stdin(match upstream.take() {
                Some(stdout) => Stdio::from(stdout),
                None => Stdio::null(),
            });
            command.stdout(Stdio::piped());
            command.stderr(match stage.stderr {
                StderrMode::Capture => Stdio::piped(),
                StderrMode::Inherit => Stdio::inherit(),
            });

            let spawned = command.spawn();
            // Release our copy of the upstream read end.
            drop(command);

            let mut child = match spawned {
                Ok(child) => child,
                Err(source) => {
                    reap(started);
                    return Err(EngineError::Spawn {
                        stage: index,
                        program: stage.program().to_string(),
                        source,
                    });
                }
            };

            let mut stderr_reader = None;
            if index < last {
                upstream = child.stdout.take();
                stderr_reader = child.stderr.take().map(drain_stderr);
            }
            started.push(Started {
                child,
                program: stage.program().to_string(),
                stderr_reader,
            });
        }

        let Some(terminal) = started.pop() else {
            return Err(EngineError::Config("pipeline needs at least one command".to_string()));
        };

        // Drain the terminal stage first so a full output pipe cannot stall the chain.
        let terminal_program = terminal.program;
        let terminal_result = terminal.child.wait_with_output();

        let mut failures = Vec::new();
        for (index, mut stage) in started.into_iter().enumerate() {
            let status = stage.child.wait();
            let diagnostic = stage.collect_stderr();
            let reason = match status {
                Ok(status) if status.success() => continue,
                Ok(status) => status.to_string(),
                Err(err) => format!("wait failed: {}", err),
            };
            failures.push(StageFailure {
                stage: index,
                program: stage.program,
                reason,
                diagnostic,
            });
        }

        let mut output = PipelineOutput::default();
        match terminal_result {
            Ok(result) => {
                output.stdout = split_lines(&result.stdout);
                output.stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
                if !result.status.success() {
                    failures.push(StageFailure {
                        stage: last,
                        program: terminal_program,
                        reason: result.status.to_string(),
                        diagnostic: output.stderr.clone(),
                    });
                }
            }
            Err(err) => failures.push(StageFailure {
                stage: last,
                program: terminal_program,
                reason: format!("wait failed: {}", err),
                diagnostic: String::new(),
            }),
        }
        output.failures = failures;

        if let Some(failure) = output.first_failure() {
            debug!(pipeline = %pipeline, failure = %failure, "pipeline failed");
        }
        Ok(output)
    }
}

/// Routes commands through one of two entry points.
///
/// Observational calls always run. Mutating calls become logged no-ops when
/// the session is a dry run.
#[derive(Debug)]
pub struct Executor<R> {
    runner: R,
    dry_run: bool,
}

impl<R: CommandRunner> Executor<R> {
    pub fn new(runner: R, dry_run: bool) -> Self {
        Executor { runner, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run a command that only reads external state.
    pub fn observe(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError> {
        self.runner.run(pipeline)
    }

    /// Run a command that changes external state, unless this is a dry run.
    pub fn mutate(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError> {
        if self.dry_run {
            info!(command = %pipeline, "skipping command due to dry run");
            return Ok(PipelineOutput::default());
        }
        self.runner.run(pipeline)
    }
}
