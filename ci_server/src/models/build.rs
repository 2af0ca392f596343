//! Build attempts: one fetch/build/test run for a single pushed commit.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::push::PushEvent;

/// Build state, also the commit status sent to GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Success,
    Failure,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::Pending)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage of an attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    Workspace,
    Clone,
    Checkout,
    Build,
    Test,
}

impl BuildStep {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStep::Workspace => "workspace",
            BuildStep::Clone => "git clone",
            BuildStep::Checkout => "git checkout",
            BuildStep::Build => "build",
            BuildStep::Test => "test",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build attempt. Pending while the pipeline runs it, then terminal and
/// never modified again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAttempt {
    pub id: Uuid,
    pub commit_id: String,
    pub branch: String,
    pub repository: String,
    pub pusher: String,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: BuildStatus,
    pub compile_success: bool,
    pub test_success: bool,
    #[serde(default)]
    pub fetch_log: String,
    #[serde(default)]
    pub build_log: String,
    #[serde(default)]
    pub test_log: String,
    pub failed_step: Option<BuildStep>,
    pub summary: Option<String>,
}

impl BuildAttempt {
    /// Start a pending attempt for `event`.
    pub fn new(event: &PushEvent) -> Self {
        let message = event
            .head_commit
            .as_ref()
            .map(|c| c.message.clone())
            .filter(|m| !m.is_empty());

        Self {
            id: Uuid::new_v4(),
            commit_id: event.after.clone(),
            branch: event.branch.clone(),
            repository: event.repo_slug(),
            pusher: event.pusher.clone(),
            message,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            status: BuildStatus::Pending,
            compile_success: false,
            test_success: false,
            fetch_log: String::new(),
            build_log: String::new(),
            test_log: String::new(),
            failed_step: None,
            summary: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the attempt failed at `step`.
    pub fn fail(mut self, step: BuildStep, summary: impl Into<String>) -> Self {
        self.failed_step = Some(step);
        self.summary = Some(summary.into());
        self.finish(BuildStatus::Failure)
    }

    /// Close the attempt from its compile/test flags: success needs both.
    pub fn conclude(self) -> Self {
        let status = if self.compile_success && self.test_success {
            BuildStatus::Success
        } else {
            BuildStatus::Failure
        };
        self.finish(status)
    }

    fn finish(mut self, status: BuildStatus) -> Self {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self
    }

    /// One-line description for the commit status.
    pub fn status_description(&self) -> String {
        match (self.status, self.failed_step) {
            (BuildStatus::Pending, _) => "Build started".to_string(),
            (BuildStatus::Success, _) => "Build and tests passed".to_string(),
            (BuildStatus::Failure, Some(BuildStep::Test)) => {
                "Build passed, tests failed".to_string()
            }
            (BuildStatus::Failure, Some(step)) => format!("Build failed at {step}"),
            (BuildStatus::Failure, None) => "Build failed".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> PushEvent {
        let raw = include_str!("../../tests/fixtures/github_push.json");
        PushEvent::decode(raw.as_bytes()).unwrap()
    }

    #[test]
    fn new_attempt_copies_event_fields() {
        let a = BuildAttempt::new(&event());

        assert!(!a.id.is_nil());
        assert_eq!(a.commit_id, "e5f6g7h8");
        assert_eq!(a.branch, "main");
        assert_eq!(a.repository, "user/repo");
        assert_eq!(a.message.as_deref(), Some("Update README"));
        assert_eq!(a.status, BuildStatus::Pending);
        assert!(!a.is_terminal());
        assert!(a.finished_at.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let e = event();
        assert_ne!(BuildAttempt::new(&e).id, BuildAttempt::new(&e).id);
    }

    #[test]
    fn conclude_requires_compile_and_tests() {
        let mut a = BuildAttempt::new(&event());
        a.compile_success = true;
        a.test_success = false;
        let a = a.conclude();
        assert_eq!(a.status, BuildStatus::Failure);
        assert!(a.finished_at.is_some());

        let mut b = BuildAttempt::new(&event());
        b.compile_success = true;
        b.test_success = true;
        assert_eq!(b.conclude().status, BuildStatus::Success);
    }

    #[test]
    fn fail_records_step_and_summary() {
        let a = BuildAttempt::new(&event())
            .fail(BuildStep::Clone, "git clone failed with exit code 128");

        assert_eq!(a.status, BuildStatus::Failure);
        assert_eq!(a.failed_step, Some(BuildStep::Clone));
        assert_eq!(a.status_description(), "Build failed at git clone");
        assert!(a.duration_ms.is_some());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&BuildStatus::Failure).unwrap(), "\"failure\"");
        assert_eq!(
            serde_json::from_str::<BuildStatus>("\"pending\"").unwrap(),
            BuildStatus::Pending
        );
    }
}
