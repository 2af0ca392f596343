//! Deterministic stand-ins for the pipeline's collaborators (testing only).
//!
//! `ScriptedRunner` replaces real processes, `RecordingReporter` replaces
//! the GitHub status API. Both can share a [`Journal`] so tests can assert
//! the order in which the pipeline touched them.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::models::build::{BuildStatus, BuildStep};
use crate::models::push::StatusTarget;
use crate::services::github_service::StatusReporter;
use crate::services::process::{CommandOutput, ProcessRunner, StepCommand};

/// Shared, ordered log of what fakes were asked to do.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// Canned result for one step.
#[derive(Debug, Clone)]
pub enum StepScript {
    Exit { code: i32, output: String },
    TimedOut { output: String },
    SpawnError(String),
    /// Block until the gate is opened, then exit 0.
    Gated(Arc<Notify>),
}

impl StepScript {
    pub fn exit(code: i32, output: impl Into<String>) -> Self {
        StepScript::Exit {
            code,
            output: output.into(),
        }
    }

    pub fn timeout(output: impl Into<String>) -> Self {
        StepScript::TimedOut {
            output: output.into(),
        }
    }

    pub fn spawn_error(message: impl Into<String>) -> Self {
        StepScript::SpawnError(message.into())
    }

    /// Each `gate.notify_one()` lets one blocked step through.
    pub fn gated(gate: Arc<Notify>) -> Self {
        StepScript::Gated(gate)
    }
}

/// Process runner that answers from a script keyed by step.
/// Unscripted steps exit 0 with no output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: HashMap<BuildStep, StepScript>,
    calls: Mutex<Vec<StepCommand>>,
    journal: Option<Journal>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, step: BuildStep, script: StepScript) -> Self {
        self.scripts.insert(step, script);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<StepCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<BuildStep> {
        self.calls().into_iter().map(|c| c.step).collect()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, cmd: &StepCommand) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("run:{}", cmd.step));
        }

        match self.scripts.get(&cmd.step) {
            Some(StepScript::Gated(gate)) => {
                let gate = gate.clone();
                gate.notified().await;
                Ok(CommandOutput {
                    exit_code: Some(0),
                    output: String::new(),
                    timed_out: false,
                })
            }
            None => Ok(CommandOutput {
                exit_code: Some(0),
                output: String::new(),
                timed_out: false,
            }),
            Some(StepScript::Exit { code, output }) => Ok(CommandOutput {
                exit_code: Some(*code),
                output: output.clone(),
                timed_out: false,
            }),
            Some(StepScript::TimedOut { output }) => Ok(CommandOutput {
                exit_code: None,
                output: output.clone(),
                timed_out: true,
            }),
            Some(StepScript::SpawnError(message)) => {
                Err(io::Error::new(io::ErrorKind::NotFound, message.clone()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// One status the pipeline tried to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedStatus {
    pub target: StatusTarget,
    pub state: BuildStatus,
    pub description: String,
    pub target_url: Option<String>,
}

/// Status reporter that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ReportedStatus>>,
    journal: Option<Journal>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn reports(&self) -> Vec<ReportedStatus> {
        self.reports.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<BuildStatus> {
        self.reports().into_iter().map(|r| r.state).collect()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(
        &self,
        target: &StatusTarget,
        state: BuildStatus,
        description: &str,
        target_url: Option<&str>,
    ) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("report:{state}"));
        }
        self.reports.lock().unwrap().push(ReportedStatus {
            target: target.clone(),
            state,
            description: description.to_string(),
            target_url: target_url.map(str::to_string),
        });
    }
}
