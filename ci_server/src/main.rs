//! pushci server: push-triggered build and test runner.
//!
//! Listens for GitHub push webhooks, builds and tests the pushed commit in a
//! scratch workspace, posts the result as a commit status and keeps a JSON
//! history of every attempt.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use pushci_server::config::CiConfig;
use pushci_server::routes::{self, CiRouterState};
use pushci_server::services::build_service::BuildPipeline;
use pushci_server::services::executor::BuildExecutor;
use pushci_server::services::github_service::GithubStatusReporter;
use pushci_server::services::history_store::BuildHistoryStore;
use pushci_server::services::process::SystemRunner;
use pushci_server::services::workspace_service::WorkspaceManager;

#[derive(Parser)]
#[command(name = "pushci", about = "Push-triggered build and test server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// Build history file
    #[arg(long, env = "CI_HISTORY_PATH", default_value = "buildhist/build-history.json")]
    history_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting pushci server...");

    let config = CiConfig::from_env();

    let history = BuildHistoryStore::open(&cli.history_path)
        .await
        .with_context(|| format!("opening build history {}", cli.history_path.display()))?;
    let history = Arc::new(history);
    tracing::info!(path = %history.path().display(), "Build history file");

    let executor = BuildExecutor::new(Arc::new(SystemRunner), config.pipeline());
    let reporter = Arc::new(GithubStatusReporter::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
        config.status_context.clone(),
    ));
    let workspaces = WorkspaceManager::new(config.workspace_dir.clone());
    tracing::info!(
        workspace_root = %workspaces.root().display(),
        max_concurrent = config.max_concurrent_builds,
        "Build pipeline configured"
    );

    let pipeline = BuildPipeline::new(executor, reporter, workspaces, history)
        .with_dashboard_url(config.dashboard_url.clone());

    let shutdown_grace = config.shutdown_grace();
    let state = CiRouterState::new(Arc::new(pipeline), config);
    let app = routes::ci_router(state.clone());

    // Initialize metrics
    pushci_server::metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("pushci server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Accepted builds still owe GitHub a final status and a history entry.
    state.drain_builds(shutdown_grace).await;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
