//! GitHub resource client - snapshot fetches for the change detector
//!
//! Every tracked poll runs under a subscriber's personal token, so clients
//! are built per token and cached. Fetch failures are classified into the
//! [`FetchError`] taxonomy the scheduler escalates on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::FetchError;

/// A published release, as carried in notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: String,
    pub tag_name: String,
    pub name: Option<String>,
    pub html_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// An open issue, as carried in notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub author_url: String,
    pub html_url: String,
    pub body: Option<String>,
}

/// A starred repository, as carried in notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarredRepo {
    pub id: String,
    pub full_name: String,
    pub html_url: String,
    pub description: Option<String>,
}

/// Snapshot fetches against the source system.
///
/// The single-value endpoints return `Ok(None)` when the resource exists but
/// has nothing to report (no releases yet, no open issues); `NotFound` is
/// reserved for the resource itself being gone.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Latest published release of a repository
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Option<Release>, FetchError>;

    /// Most recently opened issue of a repository
    async fn latest_open_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Option<Issue>, FetchError>;

    /// The token owner's most recently starred repositories, newest first
    async fn starred_page(
        &self,
        token: &str,
        per_page: u8,
    ) -> Result<Vec<StarredRepo>, FetchError>;

    /// Login of the account the token authenticates as
    async fn viewer_login(&self, token: &str) -> Result<String, FetchError>;
}

/// Octocrab-backed client with a per-token instance cache
pub struct GitHubFetcher {
    clients: Mutex<HashMap<String, Octocrab>>,
}

impl GitHubFetcher {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get or build an authenticated client for a token
    async fn client_for(&self, token: &str) -> Result<Octocrab, FetchError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(token) {
            return Ok(client.clone());
        }

        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build client: {}", e)))?;

        clients.insert(token.to_string(), client.clone());
        debug!("Built GitHub client (cache size: {})", clients.len());
        Ok(client)
    }

    /// Whether the repository itself exists. Used to tell "no releases yet"
    /// apart from "repository gone" (both 404 on the latest-release endpoint).
    /// Transport failures during the probe propagate as errors rather than
    /// masquerading as a verdict.
    async fn repo_exists(&self, client: &Octocrab, owner: &str, repo: &str) -> Result<bool, FetchError> {
        match client.repos(owner, repo).get().await {
            Ok(_) => Ok(true),
            Err(err) => match classify(err) {
                FetchError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }
}

/// Outcome of a 404 on the latest-release endpoint, given the result of the
/// repository-existence probe: an existing repo simply has no releases yet,
/// a confirmed-missing repo is not-found, and a failed probe stays a
/// transient error so it never feeds the escalation counter.
fn latest_release_after_not_found(
    repo_probe: Result<bool, FetchError>,
) -> Result<Option<Release>, FetchError> {
    match repo_probe {
        Ok(true) => Ok(None),
        Ok(false) => Err(FetchError::NotFound),
        Err(other) => Err(other),
    }
}

impl Default for GitHubFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an octocrab error into the scheduler's failure taxonomy
fn classify(err: octocrab::Error) -> FetchError {
    match err {
        octocrab::Error::GitHub { source, .. } => match source.status_code.as_u16() {
            404 | 410 => FetchError::NotFound,
            401 | 403 => FetchError::Unauthorized,
            status => FetchError::Transport(format!("GitHub error {}: {}", status, source.message)),
        },
        other => FetchError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ResourceClient for GitHubFetcher {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Option<Release>, FetchError> {
        let client = self.client_for(token).await?;

        let release = match client.repos(owner, repo).releases().get_latest().await {
            Ok(release) => release,
            Err(err) => {
                return match classify(err) {
                    FetchError::NotFound => {
                        let probe = self.repo_exists(&client, owner, repo).await;
                        latest_release_after_not_found(probe)
                    }
                    other => Err(other),
                };
            }
        };

        Ok(Some(Release {
            id: release.id.0.to_string(),
            tag_name: release.tag_name,
            name: release.name,
            html_url: release.html_url.to_string(),
            published_at: release.published_at,
        }))
    }

    async fn latest_open_issue(
        &self,
        owner: &str,
        repo: &str,
        token: &str,
    ) -> Result<Option<Issue>, FetchError> {
        let client = self.client_for(token).await?;

        let page = client
            .issues(owner, repo)
            .list()
            .state(octocrab::params::State::Open)
            .per_page(1)
            .send()
            .await
            .map_err(classify)?;

        Ok(page.items.into_iter().next().map(|issue| Issue {
            id: issue.id.0.to_string(),
            number: issue.number,
            title: issue.title,
            author: issue.user.login.clone(),
            author_url: issue.user.html_url.to_string(),
            html_url: issue.html_url.to_string(),
            body: issue.body,
        }))
    }

    async fn starred_page(
        &self,
        token: &str,
        per_page: u8,
    ) -> Result<Vec<StarredRepo>, FetchError> {
        let client = self.client_for(token).await?;

        let page = client
            .current()
            .list_repos_starred_by_authenticated_user()
            .per_page(per_page)
            .send()
            .await
            .map_err(classify)?;

        let repos = page
            .items
            .into_iter()
            .map(|repo| {
                let full_name = repo.full_name.unwrap_or_else(|| {
                    let owner = repo
                        .owner
                        .as_ref()
                        .map(|o| o.login.as_str())
                        .unwrap_or("unknown");
                    format!("{}/{}", owner, repo.name)
                });
                let html_url = repo
                    .html_url
                    .map(|url| url.to_string())
                    .unwrap_or_else(|| format!("https://github.com/{}", full_name));

                StarredRepo {
                    id: repo.id.0.to_string(),
                    full_name,
                    html_url,
                    description: repo.description,
                }
            })
            .collect();

        Ok(repos)
    }

    async fn viewer_login(&self, token: &str) -> Result<String, FetchError> {
        let client = self.client_for(token).await?;

        let user = client.current().user().await.map_err(classify)?;
        Ok(user.login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_404_with_existing_repo_means_no_releases_yet() {
        let result = latest_release_after_not_found(Ok(true));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_release_404_with_missing_repo_stays_not_found() {
        let result = latest_release_after_not_found(Ok(false));
        assert!(matches!(result, Err(FetchError::NotFound)));
    }

    #[test]
    fn test_failed_existence_probe_is_not_a_not_found_verdict() {
        // A transport hiccup during the probe must not look like a missing
        // repository, or it would feed the escalation counter.
        let result =
            latest_release_after_not_found(Err(FetchError::Transport("connection reset".into())));
        assert!(matches!(result, Err(FetchError::Transport(_))));

        let result = latest_release_after_not_found(Err(FetchError::Unauthorized));
        assert!(matches!(result, Err(FetchError::Unauthorized)));
    }
}
