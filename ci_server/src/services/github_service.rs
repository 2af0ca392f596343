//! GitHub integration: webhook validation and commit status updates.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::{display_chain, ReportingError};
use crate::models::build::BuildStatus;
use crate::models::push::StatusTarget;

type HmacSha256 = Hmac<Sha256>;

/// GitHub rejects longer status descriptions.
const MAX_DESCRIPTION_CHARS: usize = 140;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Delivers commit statuses. Delivery never affects the build itself.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Post `state` for the commit at `target`. Failures are logged, not returned.
    async fn report(
        &self,
        target: &StatusTarget,
        state: BuildStatus,
        description: &str,
        target_url: Option<&str>,
    );
}

/// Posts statuses to the GitHub REST API.
#[derive(Clone)]
pub struct GithubStatusReporter {
    client: reqwest::Client,
    api_url: String,
    token: String,
    context: String,
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    state: BuildStatus,
    description: String,
    context: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
}

impl GithubStatusReporter {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pushci/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            context: context.into(),
        }
    }

    /// Status endpoint for one commit.
    pub fn status_url(&self, target: &StatusTarget) -> String {
        format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, target.owner, target.name, target.sha
        )
    }

    /// Post a status and surface what went wrong.
    ///
    /// Returns `Ok` without sending anything when no token is configured.
    pub async fn try_report(
        &self,
        target: &StatusTarget,
        state: BuildStatus,
        description: &str,
        target_url: Option<&str>,
    ) -> Result<(), ReportingError> {
        if self.token.is_empty() {
            tracing::debug!("GitHub token not set, skipping status update");
            return Ok(());
        }

        let url = self.status_url(target);
        let body = StatusBody {
            state,
            description: truncate(description, MAX_DESCRIPTION_CHARS),
            context: &self.context,
            target_url,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(sha = %target.sha, state = %state, "Commit status posted");
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReportingError::NotFound { url });
        }

        let text = resp.text().await.unwrap_or_default();
        Err(ReportingError::Rejected {
            status: status.as_u16(),
            body: text,
        })
    }
}

#[async_trait]
impl StatusReporter for GithubStatusReporter {
    async fn report(
        &self,
        target: &StatusTarget,
        state: BuildStatus,
        description: &str,
        target_url: Option<&str>,
    ) {
        if let Err(e) = self.try_report(target, state, description, target_url).await {
            crate::metrics::status_report_failed();
            let not_found = matches!(e, ReportingError::NotFound { .. });
            let e = display_chain(e);
            if not_found {
                tracing::warn!(
                    owner = %target.owner,
                    repo = %target.name,
                    "GitHub status update failed, repository address is probably misconfigured: {e}"
                );
            } else {
                tracing::warn!(
                    sha = %target.sha,
                    state = %state,
                    "GitHub status update failed: {e}"
                );
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"after":"abc"}"#;
        assert!(validate_signature("s3cret", body, &sign("s3cret", body)));
    }

    #[test]
    fn wrong_or_missing_signature_is_rejected() {
        let body = br#"{"after":"abc"}"#;
        assert!(!validate_signature("s3cret", body, &sign("other", body)));
        assert!(!validate_signature("s3cret", body, ""));
        assert!(!validate_signature("s3cret", body, "sha256=not-hex"));
    }

    #[test]
    fn no_secret_skips_validation() {
        assert!(validate_signature("", b"anything", ""));
    }

    #[test]
    fn status_url_from_target() {
        let reporter = GithubStatusReporter::new("https://api.github.com/", "t", "pushci");
        let target = StatusTarget {
            owner: "user".to_string(),
            name: "repo".to_string(),
            sha: "e5f6g7h8".to_string(),
        };
        assert_eq!(
            reporter.status_url(&target),
            "https://api.github.com/repos/user/repo/statuses/e5f6g7h8"
        );
    }

    #[test]
    fn body_matches_status_api_shape() {
        let body = StatusBody {
            state: BuildStatus::Pending,
            description: "Build started".to_string(),
            context: "pushci",
            target_url: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "state": "pending",
                "description": "Build started",
                "context": "pushci"
            })
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 140), "short");
    }
}
