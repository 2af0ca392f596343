//! Error types for the build pipeline.
//!
//! Only [`InvalidPayload`] ever reaches a webhook caller. Everything else is
//! captured into a build attempt or logged by the component that hit it.

use std::path::PathBuf;

use uuid::Uuid;

/// Render `err` with its causes, `: `-separated, for logs and build summaries.
pub fn display_chain<E>(err: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::new(err))
}

/// A push payload that could not be turned into a [`crate::models::push::PushEvent`].
#[derive(Debug, thiserror::Error)]
pub enum InvalidPayload {
    #[error("malformed push payload")]
    Malformed(#[source] serde_json::Error),

    #[error("push payload field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("push payload field `{0}` must not start with '-'")]
    UnsafeArgument(&'static str),
}

/// Failure to create or clean up a build workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace root {path}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create workspace {path}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not allocate a unique workspace under {root} after {attempts} attempts")]
    Exhausted { root: PathBuf, attempts: u32 },
}

/// A commit status that did not reach the provider.
#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    #[error("status request failed")]
    Transport(#[from] reqwest::Error),

    #[error("status endpoint not found ({url}); check the repository owner/name")]
    NotFound { url: String },

    #[error("status update rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failure loading or persisting the build history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to read build history {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build history {path} is not valid JSON")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize build history")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to persist build history {path}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build {0} is still pending and cannot be recorded")]
    NotTerminal(Uuid),

    #[error("build {0} is already recorded")]
    Duplicate(Uuid),
}
