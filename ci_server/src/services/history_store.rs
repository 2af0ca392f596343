//! Build history: append-only list of finished attempts, kept as a
//! pretty-printed JSON array on disk and rewritten on every append.
//!
//! Writes go to a sibling temp file which is then renamed over the history
//! file, so a reader or a restart sees the old list or the new one, never a
//! half-written file. Appends hold the write lock across the disk write, so
//! concurrent builds cannot interleave their saves.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::HistoryError;
use crate::models::build::BuildAttempt;

pub struct BuildHistoryStore {
    path: PathBuf,
    builds: RwLock<Vec<BuildAttempt>>,
}

impl BuildHistoryStore {
    /// Load history from `path`. A missing or empty file is an empty history.
    ///
    /// A file that exists but does not parse is an error: starting empty would
    /// overwrite it on the next append.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let builds = load(&path).await?;

        tracing::info!(path = %path.display(), builds = builds.len(), "Build history loaded");

        Ok(Self {
            path,
            builds: RwLock::new(builds),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a terminal attempt and persist the whole history.
    ///
    /// If the write fails the attempt stays in memory and the error is
    /// returned for the caller to log.
    pub async fn append(&self, attempt: BuildAttempt) -> Result<(), HistoryError> {
        if !attempt.is_terminal() {
            return Err(HistoryError::NotTerminal(attempt.id));
        }

        let mut builds = self.builds.write().await;
        if builds.iter().any(|b| b.id == attempt.id) {
            return Err(HistoryError::Duplicate(attempt.id));
        }
        builds.push(attempt);

        let bytes = serde_json::to_vec_pretty(&*builds).map_err(HistoryError::Serialize)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| HistoryError::Persist {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| HistoryError::Persist {
                path: self.path.clone(),
                source,
            })
    }

    /// Every recorded attempt, oldest first.
    pub async fn all(&self) -> Vec<BuildAttempt> {
        self.builds.read().await.clone()
    }

    /// The last `limit` attempts, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<BuildAttempt> {
        let builds = self.builds.read().await;
        let skip = builds.len().saturating_sub(limit);
        builds[skip..].to_vec()
    }

    pub async fn get(&self, id: Uuid) -> Option<BuildAttempt> {
        self.builds.read().await.iter().find(|b| b.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.builds.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.builds.read().await.is_empty()
    }
}

async fn load(path: &Path) -> Result<Vec<BuildAttempt>, HistoryError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(HistoryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&bytes).map_err(|source| HistoryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // Same directory as the target, so the rename stays on one filesystem.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
