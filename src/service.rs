//! Watch service - the subscribe/unsubscribe/list surface
//!
//! Thin validation and defaulting layer over the tracking store. Chat
//! frontends and the CLI both go through here rather than touching the
//! store directly.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

use crate::store::{Destination, ItemKey, TrackerDb, WatchKind};

/// A GitHub owner or repository name: alphanumerics plus `-`, `_` and `.`
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub struct WatchService {
    store: Arc<TrackerDb>,
}

impl WatchService {
    pub fn new(store: Arc<TrackerDb>) -> Self {
        Self { store }
    }

    /// Subscribe a user to one or more watch kinds of a repository.
    ///
    /// Without an explicit destination, notifications go to the subscriber's
    /// own chat. Re-subscribing is a no-op.
    pub fn subscribe(
        &self,
        user_id: i64,
        owner: &str,
        repo: &str,
        kinds: &[WatchKind],
        destination: Option<Destination>,
    ) -> Result<()> {
        if !valid_name(owner) || !valid_name(repo) {
            bail!("Invalid repository: {}/{}", owner, repo);
        }
        if kinds.is_empty() {
            bail!("At least one watch kind is required");
        }

        let destination = destination.unwrap_or(Destination::User(user_id));
        for kind in kinds {
            let key = ItemKey::repo_watch(*kind, owner, repo);
            self.store.add_subscription(&key, user_id, &destination)?;
        }

        info!(
            "User {} subscribed to {}/{} ({} kinds)",
            user_id,
            owner,
            repo,
            kinds.len()
        );
        Ok(())
    }

    /// Watch a GitHub account's starred repositories.
    ///
    /// Polling only works while the account's own token is stored for one of
    /// the subscribers; that is checked at poll time, not here.
    pub fn watch_stars(
        &self,
        user_id: i64,
        account: &str,
        destination: Option<Destination>,
    ) -> Result<()> {
        if !valid_name(account) {
            bail!("Invalid account name: {}", account);
        }

        let key = ItemKey::Stars {
            account: account.to_string(),
        };
        let destination = destination.unwrap_or(Destination::User(user_id));
        self.store.add_subscription(&key, user_id, &destination)?;

        info!("User {} watching stars of @{}", user_id, account);
        Ok(())
    }

    /// Remove a user's release and issue watches for a repository.
    /// Returns the number of subscription rows removed.
    pub fn unsubscribe(&self, user_id: i64, owner: &str, repo: &str) -> Result<usize> {
        let removed = self.store.remove_subscription(user_id, owner, repo)?;
        if removed > 0 {
            info!("User {} unsubscribed from {}/{}", user_id, owner, repo);
        }
        Ok(removed)
    }

    /// Remove a user's star watch for an account
    pub fn unwatch_stars(&self, user_id: i64, account: &str) -> Result<usize> {
        let removed = self.store.remove_star_watch(user_id, account)?;
        if removed > 0 {
            info!("User {} stopped watching stars of @{}", user_id, account);
        }
        Ok(removed)
    }

    /// Distinct repositories a user watches, collapsing watch kinds
    pub fn list_tracked(&self, user_id: i64) -> Result<Vec<(String, String)>> {
        self.store.list_repos_of(user_id)
    }

    /// Number of tracked items the user subscribes to
    pub fn subscription_count(&self, user_id: i64) -> Result<u32> {
        self.store.subscription_count(user_id)
    }
}
