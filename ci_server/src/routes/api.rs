//! Read-only build API over the history store.

use uuid::Uuid;

use crate::models::build::BuildAttempt;
use crate::services::history_store::BuildHistoryStore;

pub const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

/// Most recent builds, newest first.
pub async fn list_builds(history: &BuildHistoryStore, limit: usize) -> Vec<BuildAttempt> {
    let mut builds = history.recent(limit.min(MAX_LIMIT)).await;
    builds.reverse();
    builds
}

/// A build by id. Ids that are not UUIDs are simply unknown.
pub async fn get_build(history: &BuildHistoryStore, build_id: &str) -> Option<BuildAttempt> {
    let id = Uuid::parse_str(build_id).ok()?;
    history.get(id).await
}
