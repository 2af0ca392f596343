//! End-to-end pipeline runs against scripted processes and a recording reporter.

use std::sync::Arc;

use pushci_server::error::InvalidPayload;
use pushci_server::fakes::{journal, Journal, RecordingReporter, ScriptedRunner, StepScript};
use pushci_server::models::build::{BuildStatus, BuildStep};
use pushci_server::models::push::StatusTarget;
use pushci_server::services::build_service::BuildPipeline;
use pushci_server::services::executor::{BuildExecutor, PipelineConfig};
use pushci_server::services::history_store::BuildHistoryStore;
use pushci_server::services::workspace_service::WorkspaceManager;

const PUSH: &[u8] = include_bytes!("fixtures/github_push.json");

struct Fixture {
    pipeline: BuildPipeline,
    runner: Arc<ScriptedRunner>,
    reporter: Arc<RecordingReporter>,
    journal: Journal,
    scratch: tempfile::TempDir,
}

impl Fixture {
    fn history_path(&self) -> std::path::PathBuf {
        self.scratch.path().join("buildhist/build-history.json")
    }

    fn workspace_root(&self) -> std::path::PathBuf {
        self.scratch.path().join("workspaces")
    }
}

async fn fixture(runner: ScriptedRunner) -> Fixture {
    let scratch = tempfile::tempdir().unwrap();
    let journal = journal();
    let runner = Arc::new(runner.with_journal(journal.clone()));
    let reporter = Arc::new(RecordingReporter::new().with_journal(journal.clone()));

    let history = BuildHistoryStore::open(scratch.path().join("buildhist/build-history.json"))
        .await
        .unwrap();
    let pipeline = BuildPipeline::new(
        BuildExecutor::new(runner.clone(), PipelineConfig::default()),
        reporter.clone(),
        WorkspaceManager::new(scratch.path().join("workspaces")),
        Arc::new(history),
    );

    Fixture {
        pipeline,
        runner,
        reporter,
        journal,
        scratch,
    }
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn workspaces_left(root: &std::path::Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(dir) => dir.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn push_runs_all_steps_in_order() {
    let fx = fixture(ScriptedRunner::new()).await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Success);
    assert!(attempt.compile_success);
    assert!(attempt.test_success);
    assert_eq!(attempt.commit_id, "e5f6g7h8");
    assert_eq!(attempt.branch, "main");
    assert_eq!(
        entries(&fx.journal),
        vec![
            "report:pending",
            "run:git clone",
            "run:git checkout",
            "run:build",
            "run:test",
            "report:success",
        ]
    );
    assert_eq!(workspaces_left(&fx.workspace_root()), 0);
}

#[tokio::test]
async fn statuses_target_the_pushed_commit() {
    let fx = fixture(ScriptedRunner::new()).await;
    fx.pipeline.handle_payload(PUSH).await.unwrap();

    let expected = StatusTarget {
        owner: "user".to_string(),
        name: "repo".to_string(),
        sha: "e5f6g7h8".to_string(),
    };
    let reports = fx.reporter.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.target == expected));
    assert_eq!(reports[0].description, "Build started");
    assert_eq!(reports[1].description, "Build and tests passed");
}

#[tokio::test]
async fn clone_failure_skips_build_and_test() {
    let fx = fixture(ScriptedRunner::new().on(
        BuildStep::Clone,
        StepScript::exit(128, "fatal: Remote branch main not found"),
    ))
    .await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Failure);
    assert!(!attempt.compile_success);
    assert!(!attempt.test_success);
    assert_eq!(attempt.failed_step, Some(BuildStep::Clone));
    assert!(attempt.fetch_log.contains("Remote branch main not found"));
    assert_eq!(fx.runner.steps(), vec![BuildStep::Clone]);
    assert_eq!(fx.reporter.states(), vec![BuildStatus::Pending, BuildStatus::Failure]);
    assert_eq!(workspaces_left(&fx.workspace_root()), 0);
}

#[tokio::test]
async fn compile_failure_is_recorded_with_log() {
    let fx = fixture(ScriptedRunner::new().on(
        BuildStep::Build,
        StepScript::exit(1, "[ERROR] COMPILATION ERROR"),
    ))
    .await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Failure);
    assert!(!attempt.compile_success);
    assert!(attempt.build_log.contains("COMPILATION ERROR"));
    assert!(!fx.runner.steps().contains(&BuildStep::Test));
}

#[tokio::test]
async fn test_failure_keeps_compile_success() {
    let fx = fixture(
        ScriptedRunner::new()
            .on(BuildStep::Build, StepScript::exit(0, "BUILD SUCCESS"))
            .on(BuildStep::Test, StepScript::exit(1, "Tests run: 3, Failures: 1")),
    )
    .await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Failure);
    assert!(attempt.compile_success);
    assert!(!attempt.test_success);
    assert!(attempt.build_log.contains("BUILD SUCCESS"));
    assert!(attempt.test_log.contains("Failures: 1"));
    assert_eq!(fx.reporter.reports()[1].description, "Build passed, tests failed");
}

#[tokio::test]
async fn timed_out_step_fails_the_attempt() {
    let fx =
        fixture(ScriptedRunner::new().on(BuildStep::Test, StepScript::timeout("Running"))).await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Failure);
    assert_eq!(attempt.failed_step, Some(BuildStep::Test));
    assert!(attempt.summary.as_deref().unwrap_or_default().contains("timed out"));
    assert_eq!(workspaces_left(&fx.workspace_root()), 0);
}

#[tokio::test]
async fn missing_tool_fails_the_attempt() {
    let fx = fixture(
        ScriptedRunner::new().on(BuildStep::Build, StepScript::spawn_error("bash: not found")),
    )
    .await;

    let attempt = fx.pipeline.handle_payload(PUSH).await.unwrap();

    assert_eq!(attempt.status, BuildStatus::Failure);
    assert_eq!(attempt.failed_step, Some(BuildStep::Build));
    assert!(fx.history_path().exists());
}

#[tokio::test]
async fn invalid_payloads_leave_no_trace() {
    let fx = fixture(ScriptedRunner::new()).await;

    let payloads: [&[u8]; 3] = [
        b"{Invalid JSON}",
        br#"{"ref": "refs/heads/main"}"#,
        br#"{"after": "", "ref": "refs/heads/main", "repository": {"clone_url": "x", "name": "r", "owner": {"name": "o"}}, "pusher": {"name": "p"}}"#,
    ];
    for raw in payloads {
        let err = fx.pipeline.handle_payload(raw).await.unwrap_err();
        assert!(matches!(
            err,
            InvalidPayload::Malformed(_) | InvalidPayload::EmptyField(_)
        ));
    }

    assert!(entries(&fx.journal).is_empty());
    assert!(fx.pipeline.history().is_empty().await);
    assert!(!fx.history_path().exists());
}

#[tokio::test]
async fn history_survives_restart() {
    let fx = fixture(ScriptedRunner::new().on(BuildStep::Test, StepScript::exit(1, "FAIL"))).await;

    let first = fx.pipeline.handle_payload(PUSH).await.unwrap();
    let second = fx.pipeline.handle_payload(PUSH).await.unwrap();
    assert_ne!(first.id, second.id);

    let reopened = BuildHistoryStore::open(fx.history_path()).await.unwrap();
    assert_eq!(reopened.all().await, vec![first, second]);
}

#[tokio::test]
async fn concurrent_runs_get_distinct_workspaces() {
    let fx = fixture(ScriptedRunner::new()).await;

    let (a, b, c, d) = tokio::join!(
        fx.pipeline.handle_payload(PUSH),
        fx.pipeline.handle_payload(PUSH),
        fx.pipeline.handle_payload(PUSH),
        fx.pipeline.handle_payload(PUSH),
    );
    let attempts = [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];

    let mut cwds: Vec<_> = fx
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.step == BuildStep::Clone)
        .map(|c| c.cwd)
        .collect();
    cwds.sort();
    cwds.dedup();
    assert_eq!(cwds.len(), 4);
    assert!(attempts.iter().all(|a| a.status == BuildStatus::Success));
    assert_eq!(fx.pipeline.history().len().await, 4);
    assert_eq!(workspaces_left(&fx.workspace_root()), 0);
}
