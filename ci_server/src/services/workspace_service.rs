//! Per-build workspaces: one fresh directory per attempt, always removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::WorkspaceError;

const MAX_ALLOCATION_ATTEMPTS: u32 = 8;

/// Hands out build directories under a shared scratch root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty workspace directory.
    ///
    /// The leaf is created with `create_dir`, so two callers can never end up
    /// with the same directory even if names collided.
    pub fn acquire(&self) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.root).map_err(|source| WorkspaceError::Root {
            path: self.root.clone(),
            source,
        })?;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let path = self.root.join(format!("build-{}", Uuid::new_v4().simple()));
            match fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!(workspace = %path.display(), "Workspace acquired");
                    return Ok(Workspace {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(WorkspaceError::Create { path, source }),
            }
        }

        Err(WorkspaceError::Exhausted {
            root: self.root.clone(),
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}

/// A build directory owned by exactly one attempt.
///
/// Removed by [`Workspace::release`], or on drop if it was never released.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the workspace. Failures are logged, never returned.
    pub fn release(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let failed = remove_tree(&self.path);
        if failed > 0 {
            tracing::warn!(
                workspace = %self.path.display(),
                failed,
                "Workspace only partially removed"
            );
        } else {
            tracing::debug!(workspace = %self.path.display(), "Workspace released");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Depth-first removal that keeps going past entries it cannot delete.
/// Returns the number of entries left behind.
fn remove_tree(path: &Path) -> usize {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Cannot stat for removal: {e}");
            return 1;
        }
    };

    if !meta.is_dir() {
        return match fs::remove_file(path) {
            Ok(()) => 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to remove file: {e}");
                1
            }
        };
    }

    let mut failed = 0;
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(entry) => failed += remove_tree(&entry.path()),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Failed to read entry: {e}");
                        failed += 1;
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to list directory: {e}");
            failed += 1;
        }
    }

    match fs::remove_dir(path) {
        Ok(()) => failed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => failed,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to remove directory: {e}");
            failed + 1
        }
    }
}
