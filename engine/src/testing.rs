//! Recording `CommandRunner` used by the engine's unit tests.
//!
//! Rules are matched against the rendered pipeline (`a b | c d`). A pattern
//! ending in `*` matches by prefix, anything else must match exactly.
//! Unmatched pipelines succeed with no output.

use std::sync::Mutex;

use crate::error::EngineError;
use crate::pipeline::{CommandRunner, Pipeline, PipelineOutput, StageFailure};

struct Rule {
    pattern: String,
    stdout: Vec<String>,
    fail: bool,
    /// Only the nth matching call (1-based) fails
    on_call: Option<usize>,
    seen: usize,
}

impl Rule {
    fn matches(&self, rendered: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => rendered.starts_with(prefix),
            None => rendered == self.pattern,
        }
    }
}

pub(crate) struct StubRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl StubRunner {
    pub(crate) fn new() -> Self {
        StubRunner {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn rule(self, pattern: &str, stdout: &[&str], fail: bool, on_call: Option<usize>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            stdout: stdout.iter().map(|l| l.to_string()).collect(),
            fail,
            on_call,
            seen: 0,
        });
        self
    }

    pub(crate) fn respond(self, pattern: &str, stdout: &[&str]) -> Self {
        self.rule(pattern, stdout, false, None)
    }

    pub(crate) fn fail(self, pattern: &str) -> Self {
        self.rule(pattern, &[], true, None)
    }

    pub(crate) fn fail_on_call(self, pattern: &str, call: usize) -> Self {
        self.rule(pattern, &[], true, Some(call))
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose first stage creates, sends, receives or destroys.
    pub(crate) fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| {
                let words: Vec<&str> = call.split_whitespace().collect();
                match words.get(1).copied() {
                    Some("snapshot") | Some("destroy") | Some("receive") => true,
                    Some("send") => words.get(2) != Some(&"-n"),
                    _ => false,
                }
            })
            .collect()
    }
}

impl CommandRunner for StubRunner {
    fn run(&self, pipeline: &Pipeline) -> Result<PipelineOutput, EngineError> {
        let rendered = pipeline.to_string();
        self.calls.lock().unwrap().push(rendered.clone());

        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| r.matches(&rendered)) else {
            return Ok(PipelineOutput::default());
        };
        rule.seen += 1;

        let fails = rule.fail && rule.on_call.map_or(true, |n| n == rule.seen);
        let mut output = PipelineOutput {
            stdout: rule.stdout.clone(),
            ..PipelineOutput::default()
        };
        if fails {
            let last = pipeline.len() - 1;
            output.stderr = "stub failure".to_string();
            output.failures.push(StageFailure {
                stage: last,
                program: pipeline.stages()[last].program().to_string(),
                reason: "exit status: 1".to_string(),
                diagnostic: output.stderr.clone(),
            });
        }
        Ok(output)
    }
}
