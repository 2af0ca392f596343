//! Server configuration: loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::services::executor::PipelineConfig;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// GitHub token for commit status updates. Empty disables reporting.
    pub github_token: String,
    /// Base URL of the GitHub REST API.
    pub github_api_url: String,
    /// Context string shown next to the commit status.
    pub status_context: String,
    /// Dashboard base URL for GitHub status links.
    pub dashboard_url: Option<String>,
    /// Scratch root under which per-build workspaces are created.
    pub workspace_dir: PathBuf,
    /// Shell command for the build step.
    pub build_command: String,
    /// Shell command for the test step.
    pub test_command: String,
    /// Wall-clock limit for each subprocess, in seconds.
    pub step_timeout_secs: u64,
    /// Maximum number of builds running at once.
    pub max_concurrent_builds: usize,
    /// How long shutdown waits for accepted builds, in seconds.
    pub shutdown_grace_secs: u64,
}

impl CiConfig {
    pub fn from_env() -> Self {
        let github_webhook_secret = std::env::var("CI_WEBHOOK_SECRET").unwrap_or_default();
        let github_token = std::env::var("CI_GITHUB_TOKEN").unwrap_or_default();
        let github_api_url = std::env::var("CI_GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string());
        let status_context =
            std::env::var("CI_STATUS_CONTEXT").unwrap_or_else(|_| "pushci".to_string());
        let dashboard_url = std::env::var("CI_DASHBOARD_URL")
            .ok()
            .filter(|s| !s.is_empty());
        let workspace_dir = std::env::var("CI_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("pushci-builds"));
        let build_command = std::env::var("CI_BUILD_COMMAND")
            .unwrap_or_else(|_| "mvn -B clean compile".to_string());
        let test_command =
            std::env::var("CI_TEST_COMMAND").unwrap_or_else(|_| "mvn -B test".to_string());
        let step_timeout_secs = std::env::var("CI_STEP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(600);
        let max_concurrent_builds = std::env::var("CI_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);
        let shutdown_grace_secs = std::env::var("CI_SHUTDOWN_GRACE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);

        if github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        Self {
            github_webhook_secret,
            github_token,
            github_api_url,
            status_context,
            dashboard_url,
            workspace_dir,
            build_command,
            test_command,
            step_timeout_secs,
            max_concurrent_builds,
            shutdown_grace_secs,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            build_command: self.build_command.clone(),
            test_command: self.test_command.clone(),
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }
}
