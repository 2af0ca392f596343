//! GitHub push event: the only trigger a build is created from.

use serde::{Deserialize, Serialize};

use crate::error::InvalidPayload;

const BRANCH_PREFIX: &str = "refs/heads/";

/// A validated push notification.
///
/// Only produced by [`PushEvent::decode`], so every required field is present
/// and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    /// Commit the branch points at after the push. This is what gets built.
    pub after: String,
    /// Commit the branch pointed at before the push (empty if not sent).
    pub before: String,
    /// Pushed ref with any `refs/heads/` prefix removed.
    pub branch: String,
    pub base_ref: Option<String>,
    pub compare: Option<String>,
    pub created: bool,
    pub deleted: bool,
    pub forced: bool,
    pub repository: RepositoryRef,
    pub pusher: String,
    pub head_commit: Option<PushCommit>,
    pub commits: Vec<PushCommit>,
}

/// Where to fetch from and where to report to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRef {
    pub clone_url: String,
    pub owner: String,
    pub name: String,
    pub full_name: Option<String>,
}

/// Descriptive commit metadata carried by the push. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushCommit {
    pub id: String,
    pub message: String,
    pub timestamp: Option<String>,
    pub author_name: Option<String>,
    pub url: Option<String>,
}

/// Address of a commit status on the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub owner: String,
    pub name: String,
    pub sha: String,
}

impl PushEvent {
    /// Decode and validate a raw push payload.
    pub fn decode(raw: &[u8]) -> Result<Self, InvalidPayload> {
        let payload: PushPayload = serde_json::from_slice(raw).map_err(InvalidPayload::Malformed)?;
        payload.validate()
    }

    /// Head commit message, or empty when the push carried no head commit.
    pub fn head_commit_message(&self) -> &str {
        self.head_commit
            .as_ref()
            .map(|c| c.message.as_str())
            .unwrap_or_default()
    }

    /// `owner/name` as used in logs and build records.
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.repository.owner, self.repository.name)
    }

    pub fn status_target(&self) -> StatusTarget {
        StatusTarget {
            owner: self.repository.owner.clone(),
            name: self.repository.name.clone(),
            sha: self.after.clone(),
        }
    }
}

/// Strip a literal `refs/heads/` prefix; anything else passes through.
pub fn normalize_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_PREFIX).unwrap_or(git_ref)
}

// ── Wire format ──

#[derive(Deserialize)]
struct PushPayload {
    after: String,
    #[serde(default)]
    before: Option<String>,
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    base_ref: Option<String>,
    #[serde(default)]
    compare: Option<String>,
    #[serde(default)]
    created: Option<bool>,
    #[serde(default)]
    deleted: Option<bool>,
    #[serde(default)]
    forced: Option<bool>,
    #[serde(default)]
    head_commit: Option<WireCommit>,
    #[serde(default)]
    commits: Option<Vec<WireCommit>>,
    repository: WireRepository,
    pusher: WirePusher,
}

#[derive(Deserialize)]
struct WireRepository {
    clone_url: String,
    name: String,
    owner: WireOwner,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Deserialize)]
struct WireOwner {
    name: String,
}

#[derive(Deserialize)]
struct WirePusher {
    name: String,
}

#[derive(Deserialize)]
struct WireCommit {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    author: Option<WireAuthor>,
}

#[derive(Deserialize)]
struct WireAuthor {
    #[serde(default)]
    name: Option<String>,
}

impl From<WireCommit> for PushCommit {
    fn from(c: WireCommit) -> Self {
        Self {
            id: c.id.unwrap_or_default(),
            message: c.message.unwrap_or_default(),
            timestamp: c.timestamp,
            author_name: c.author.and_then(|a| a.name),
            url: c.url,
        }
    }
}

impl PushPayload {
    fn validate(self) -> Result<PushEvent, InvalidPayload> {
        let branch = normalize_ref(&self.git_ref).to_string();

        require("after", &self.after)?;
        require("ref", &branch)?;
        require("repository.clone_url", &self.repository.clone_url)?;
        require("repository.owner.name", &self.repository.owner.name)?;
        require("repository.name", &self.repository.name)?;
        require("pusher.name", &self.pusher.name)?;

        // These end up as git arguments.
        for (field, value) in [
            ("after", &self.after),
            ("ref", &branch),
            ("repository.clone_url", &self.repository.clone_url),
        ] {
            if value.starts_with('-') {
                return Err(InvalidPayload::UnsafeArgument(field));
            }
        }

        Ok(PushEvent {
            after: self.after,
            before: self.before.unwrap_or_default(),
            branch,
            base_ref: self.base_ref,
            compare: self.compare,
            created: self.created.unwrap_or(false),
            deleted: self.deleted.unwrap_or(false),
            forced: self.forced.unwrap_or(false),
            repository: RepositoryRef {
                clone_url: self.repository.clone_url,
                owner: self.repository.owner.name,
                name: self.repository.name,
                full_name: self.repository.full_name,
            },
            pusher: self.pusher.name,
            head_commit: self.head_commit.map(PushCommit::from),
            commits: self
                .commits
                .unwrap_or_default()
                .into_iter()
                .map(PushCommit::from)
                .collect(),
        })
    }
}

fn require(field: &'static str, value: &str) -> Result<(), InvalidPayload> {
    if value.trim().is_empty() {
        Err(InvalidPayload::EmptyField(field))
    } else {
        Ok(())
    }
}
