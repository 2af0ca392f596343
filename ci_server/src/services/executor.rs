//! Build executor: clones the pushed commit into a workspace, runs the
//! build and test commands, and classifies the attempt.
//!
//! Every step is a subprocess through [`ProcessRunner`]. A step that exits
//! non-zero (or times out, or cannot be launched) stops the attempt; later
//! steps are not run. Nothing here returns an error: all failures end up in
//! the returned [`BuildAttempt`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::build::{BuildAttempt, BuildStep};
use crate::models::push::PushEvent;
use crate::services::process::{CommandOutput, ProcessRunner, StepCommand};
use crate::services::workspace_service::Workspace;

/// What to run once the source is checked out.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub build_command: String,
    pub test_command: String,
    /// Wall-clock limit per subprocess.
    pub step_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_command: "mvn -B clean compile".to_string(),
            test_command: "mvn -B test".to_string(),
            step_timeout: Duration::from_secs(600),
        }
    }
}

pub struct BuildExecutor {
    runner: Arc<dyn ProcessRunner>,
    pipeline: PipelineConfig,
}

/// Outcome of a single step.
enum StepResult {
    Passed(String),
    Failed { log: String, summary: String },
}

impl BuildExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, pipeline: PipelineConfig) -> Self {
        Self { runner, pipeline }
    }

    /// Run fetch, build and test for `event` inside `workspace`.
    ///
    /// Takes the pending attempt and always returns it terminal.
    pub async fn execute(
        &self,
        mut attempt: BuildAttempt,
        event: &PushEvent,
        workspace: &Workspace,
    ) -> BuildAttempt {
        tracing::info!(
            build_id = %attempt.id,
            repo = %event.repo_slug(),
            branch = %event.branch,
            commit = %event.after,
            workspace = %workspace.path().display(),
            "Executing build"
        );

        // Fetch: single-branch clone, then pin the exact pushed commit.
        let clone = self.command(
            BuildStep::Clone,
            "git",
            vec![
                "clone".to_string(),
                "--branch".to_string(),
                event.branch.clone(),
                "--single-branch".to_string(),
                "--".to_string(),
                event.repository.clone_url.clone(),
                ".".to_string(),
            ],
            &attempt,
            workspace,
        );
        match self.run_step(&clone, &attempt).await {
            StepResult::Passed(log) => attempt.fetch_log.push_str(&log),
            StepResult::Failed { log, summary } => {
                attempt.fetch_log.push_str(&log);
                return attempt.fail(BuildStep::Clone, summary);
            }
        }

        let checkout = self.command(
            BuildStep::Checkout,
            "git",
            vec![
                "-c".to_string(),
                "advice.detachedHead=false".to_string(),
                "checkout".to_string(),
                "--quiet".to_string(),
                event.after.clone(),
            ],
            &attempt,
            workspace,
        );
        match self.run_step(&checkout, &attempt).await {
            StepResult::Passed(log) => attempt.fetch_log.push_str(&log),
            StepResult::Failed { log, summary } => {
                attempt.fetch_log.push_str(&log);
                return attempt.fail(BuildStep::Checkout, summary);
            }
        }

        let build = self.shell(BuildStep::Build, &self.pipeline.build_command, &attempt, workspace);
        match self.run_step(&build, &attempt).await {
            StepResult::Passed(log) => {
                attempt.build_log = log;
                attempt.compile_success = true;
            }
            StepResult::Failed { log, summary } => {
                attempt.build_log = log;
                return attempt.fail(BuildStep::Build, summary);
            }
        }

        let test = self.shell(BuildStep::Test, &self.pipeline.test_command, &attempt, workspace);
        match self.run_step(&test, &attempt).await {
            StepResult::Passed(log) => {
                attempt.test_log = log;
                attempt.test_success = true;
                attempt.conclude()
            }
            StepResult::Failed { log, summary } => {
                attempt.test_log = log;
                attempt.fail(BuildStep::Test, summary)
            }
        }
    }

    async fn run_step(&self, cmd: &StepCommand, attempt: &BuildAttempt) -> StepResult {
        tracing::info!(
            build_id = %attempt.id,
            step = %cmd.step,
            command = %cmd.display(),
            "Running step"
        );
        let start = Instant::now();
        let result = self.runner.run(cmd).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        crate::metrics::step_duration(cmd.step.as_str(), duration_ms);

        match result {
            Ok(output) if output.success() => {
                tracing::info!(
                    build_id = %attempt.id,
                    step = %cmd.step,
                    duration_ms,
                    "Step passed"
                );
                StepResult::Passed(output.output)
            }
            Ok(output) => {
                let summary = failure_summary(cmd, &output);
                tracing::warn!(
                    build_id = %attempt.id,
                    step = %cmd.step,
                    exit_code = ?output.exit_code,
                    timed_out = output.timed_out,
                    "Step failed"
                );
                let mut log = output.output;
                append_line(&mut log, &summary);
                StepResult::Failed { log, summary }
            }
            Err(e) => {
                let summary = format!("failed to launch {}: {e}", cmd.step);
                tracing::error!(build_id = %attempt.id, step = %cmd.step, "{summary}");
                StepResult::Failed {
                    log: summary.clone(),
                    summary,
                }
            }
        }
    }

    fn shell(
        &self,
        step: BuildStep,
        script: &str,
        attempt: &BuildAttempt,
        workspace: &Workspace,
    ) -> StepCommand {
        self.command(
            step,
            "bash",
            vec!["-c".to_string(), script.to_string()],
            attempt,
            workspace,
        )
    }

    fn command(
        &self,
        step: BuildStep,
        program: &str,
        args: Vec<String>,
        attempt: &BuildAttempt,
        workspace: &Workspace,
    ) -> StepCommand {
        StepCommand {
            step,
            program: program.to_string(),
            args,
            cwd: workspace.path().to_path_buf(),
            env: vec![
                ("CI".to_string(), "true".to_string()),
                ("CI_BUILD_ID".to_string(), attempt.id.to_string()),
                ("CI_BRANCH".to_string(), attempt.branch.clone()),
                ("CI_COMMIT".to_string(), attempt.commit_id.clone()),
                ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ],
            timeout: self.pipeline.step_timeout,
        }
    }
}

fn failure_summary(cmd: &StepCommand, output: &CommandOutput) -> String {
    if output.timed_out {
        format!("{} timed out after {}s", cmd.step, cmd.timeout.as_secs())
    } else {
        match output.exit_code {
            Some(code) => format!("{} failed with exit code {code}", cmd.step),
            None => format!("{} was terminated by a signal", cmd.step),
        }
    }
}

fn append_line(log: &mut String, line: &str) {
    if !log.is_empty() && !log.ends_with('\n') {
        log.push('\n');
    }
    log.push_str(line);
    log.push('\n');
}
