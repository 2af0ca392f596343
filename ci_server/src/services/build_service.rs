//! Build orchestration: one pushed commit from acceptance to history.
//!
//! Order per attempt: pending status, workspace, fetch/build/test, workspace
//! release, terminal status, history. The webhook waits for a build slot
//! between the pending status and the rest. Once an event is accepted nothing
//! here fails outward; every problem lands in the attempt or in a log line.

use std::sync::Arc;

use crate::error::{display_chain, InvalidPayload};
use crate::models::build::{BuildAttempt, BuildStep};
use crate::models::push::PushEvent;
use crate::services::executor::BuildExecutor;
use crate::services::github_service::StatusReporter;
use crate::services::history_store::BuildHistoryStore;
use crate::services::workspace_service::WorkspaceManager;

pub struct BuildPipeline {
    executor: BuildExecutor,
    reporter: Arc<dyn StatusReporter>,
    workspaces: WorkspaceManager,
    history: Arc<BuildHistoryStore>,
    dashboard_url: Option<String>,
}

impl BuildPipeline {
    pub fn new(
        executor: BuildExecutor,
        reporter: Arc<dyn StatusReporter>,
        workspaces: WorkspaceManager,
        history: Arc<BuildHistoryStore>,
    ) -> Self {
        Self {
            executor,
            reporter,
            workspaces,
            history,
            dashboard_url: None,
        }
    }

    /// Link commit statuses to `<dashboard_url>/api/builds/<id>`.
    pub fn with_dashboard_url(mut self, dashboard_url: Option<String>) -> Self {
        self.dashboard_url = dashboard_url.map(|u| u.trim_end_matches('/').to_string());
        self
    }

    pub fn history(&self) -> &Arc<BuildHistoryStore> {
        &self.history
    }

    /// Decode a raw payload and run it to completion.
    ///
    /// Only a bad payload is an error; no attempt exists in that case.
    pub async fn handle_payload(&self, raw: &[u8]) -> Result<BuildAttempt, InvalidPayload> {
        let event = PushEvent::decode(raw)?;
        let attempt = self.accept(&event);
        Ok(self.run(attempt, &event).await)
    }

    /// Create the pending attempt for an accepted event.
    pub fn accept(&self, event: &PushEvent) -> BuildAttempt {
        let attempt = BuildAttempt::new(event);
        crate::metrics::build_status_changed(attempt.status.as_str());
        tracing::info!(
            build_id = %attempt.id,
            repo = %attempt.repository,
            branch = %attempt.branch,
            commit = %attempt.commit_id,
            pusher = %event.pusher,
            "Build created from push"
        );
        attempt
    }

    /// Run a pending attempt and record it. Always returns a terminal attempt.
    pub async fn run(&self, attempt: BuildAttempt, event: &PushEvent) -> BuildAttempt {
        self.report_pending(&attempt, event).await;
        self.execute_and_record(attempt, event).await
    }

    /// Post the pending status for a freshly accepted attempt.
    pub async fn report_pending(&self, attempt: &BuildAttempt, event: &PushEvent) {
        let link = self.build_link(attempt);
        self.reporter
            .report(
                &event.status_target(),
                attempt.status,
                &attempt.status_description(),
                link.as_deref(),
            )
            .await;
    }

    /// Everything after the pending report: workspace, steps, terminal
    /// status, history.
    pub async fn execute_and_record(
        &self,
        attempt: BuildAttempt,
        event: &PushEvent,
    ) -> BuildAttempt {
        let target = event.status_target();
        let link = self.build_link(&attempt);

        let attempt = match self.workspaces.acquire() {
            Ok(workspace) => {
                let attempt = self.executor.execute(attempt, event, &workspace).await;
                workspace.release();
                attempt
            }
            Err(e) => {
                let e = display_chain(e);
                tracing::error!(build_id = %attempt.id, "Cannot create workspace: {e}");
                attempt.fail(BuildStep::Workspace, e)
            }
        };

        self.reporter
            .report(&target, attempt.status, &attempt.status_description(), link.as_deref())
            .await;

        crate::metrics::build_status_changed(attempt.status.as_str());
        if let Some(ms) = attempt.duration_ms {
            crate::metrics::build_duration(ms);
        }
        tracing::info!(
            build_id = %attempt.id,
            status = %attempt.status,
            compile_success = attempt.compile_success,
            test_success = attempt.test_success,
            duration_ms = attempt.duration_ms,
            "Build finished"
        );

        if let Err(e) = self.history.append(attempt.clone()).await {
            crate::metrics::history_persist_failed();
            tracing::warn!(
                build_id = %attempt.id,
                "Build history not persisted: {}",
                display_chain(e)
            );
        }

        attempt
    }

    fn build_link(&self, attempt: &BuildAttempt) -> Option<String> {
        self.dashboard_url
            .as_ref()
            .map(|base| format!("{base}/api/builds/{}", attempt.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{RecordingReporter, ScriptedRunner, StepScript};
    use crate::models::build::BuildStatus;
    use crate::services::executor::PipelineConfig;

    const PUSH: &[u8] = include_bytes!("../../tests/fixtures/github_push.json");

    struct Harness {
        pipeline: BuildPipeline,
        reporter: Arc<RecordingReporter>,
        _scratch: tempfile::TempDir,
    }

    async fn harness(runner: ScriptedRunner) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let history = BuildHistoryStore::open(scratch.path().join("history.json"))
            .await
            .unwrap();
        let pipeline = BuildPipeline::new(
            BuildExecutor::new(Arc::new(runner), PipelineConfig::default()),
            reporter.clone(),
            WorkspaceManager::new(scratch.path().join("workspaces")),
            Arc::new(history),
        );
        Harness {
            pipeline,
            reporter,
            _scratch: scratch,
        }
    }

    #[tokio::test]
    async fn invalid_payload_creates_no_attempt() {
        let h = harness(ScriptedRunner::new()).await;

        let err = h.pipeline.handle_payload(b"{Invalid JSON}").await.unwrap_err();
        assert!(matches!(err, InvalidPayload::Malformed(_)));
        assert!(h.pipeline.history().is_empty().await);
        assert!(h.reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn successful_build_reports_and_records() {
        let h = harness(ScriptedRunner::new()).await;

        let attempt = h.pipeline.handle_payload(PUSH).await.unwrap();
        assert_eq!(attempt.status, BuildStatus::Success);
        assert_eq!(h.reporter.states(), vec![BuildStatus::Pending, BuildStatus::Success]);
        assert_eq!(h.pipeline.history().get(attempt.id).await, Some(attempt));
    }

    #[tokio::test]
    async fn failing_tests_report_failure() {
        let h =
            harness(ScriptedRunner::new().on(BuildStep::Test, StepScript::exit(1, "FAIL"))).await;

        let attempt = h.pipeline.handle_payload(PUSH).await.unwrap();
        assert!(attempt.compile_success);
        assert!(!attempt.test_success);
        assert_eq!(h.reporter.states(), vec![BuildStatus::Pending, BuildStatus::Failure]);
    }

    #[tokio::test]
    async fn workspace_failure_is_recorded_as_failure() {
        let scratch = tempfile::tempdir().unwrap();
        // A file where the scratch root should be.
        let blocked = scratch.path().join("workspaces");
        std::fs::write(&blocked, "not a directory").unwrap();

        let reporter = Arc::new(RecordingReporter::new());
        let runner = Arc::new(ScriptedRunner::new());
        let history = Arc::new(
            BuildHistoryStore::open(scratch.path().join("history.json"))
                .await
                .unwrap(),
        );
        let pipeline = BuildPipeline::new(
            BuildExecutor::new(runner.clone(), PipelineConfig::default()),
            reporter.clone(),
            WorkspaceManager::new(&blocked),
            history.clone(),
        );

        let attempt = pipeline.handle_payload(PUSH).await.unwrap();
        assert_eq!(attempt.status, BuildStatus::Failure);
        assert_eq!(attempt.failed_step, Some(BuildStep::Workspace));
        let summary = attempt.summary.clone().unwrap_or_default();
        assert!(summary.starts_with("failed to create workspace root"), "{summary}");
        assert!(runner.calls().is_empty());
        assert_eq!(reporter.states(), vec![BuildStatus::Pending, BuildStatus::Failure]);
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn dashboard_link_is_attached() {
        let mut h = harness(ScriptedRunner::new()).await;
        h.pipeline = h
            .pipeline
            .with_dashboard_url(Some("http://ci.local:9090/".to_string()));

        let attempt = h.pipeline.handle_payload(PUSH).await.unwrap();
        let expected = format!("http://ci.local:9090/api/builds/{}", attempt.id);
        for report in h.reporter.reports() {
            assert_eq!(report.target_url.as_deref(), Some(expected.as_str()));
        }
    }
}
