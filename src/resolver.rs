//! Credential Resolver - picks which subscriber's token polls an item
//!
//! Tracked polling deliberately never falls back to a shared token (unlike
//! interactive on-demand lookups): every fetch runs as one of the item's own
//! subscribers. An item with no usable credential is simply skipped for the
//! tick, which is an expected condition, not an error.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::github::ResourceClient;
use crate::store::{ItemKey, TrackedItem};
use crate::tokens::CredentialStore;

pub struct CredentialResolver {
    credentials: Arc<dyn CredentialStore>,
    client: Arc<dyn ResourceClient>,
}

impl CredentialResolver {
    pub fn new(credentials: Arc<dyn CredentialStore>, client: Arc<dyn ResourceClient>) -> Self {
        Self {
            credentials,
            client,
        }
    }

    /// Find a usable token among the item's subscribers, or `None` to skip
    /// the poll this tick.
    ///
    /// Star watches are keyed by a GitHub account, and the starred endpoint
    /// only reports the authenticated user's stars, so a candidate token must
    /// additionally authenticate as the tracked account.
    pub async fn resolve(&self, item: &TrackedItem) -> Option<String> {
        for &user_id in &item.subscribers {
            let token = match self.credentials.credential_for(user_id).await {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Credential lookup failed for user {}: {:#}", user_id, e);
                    continue;
                }
            };

            match &item.key {
                ItemKey::Stars { account } => {
                    match self.client.viewer_login(&token).await {
                        Ok(login) if login.eq_ignore_ascii_case(account) => {
                            return Some(token);
                        }
                        Ok(login) => {
                            debug!(
                                "Token of user {} authenticates as {}, not tracked account {}",
                                user_id, login, account
                            );
                        }
                        Err(e) => {
                            debug!("Token of user {} failed validation: {}", user_id, e);
                        }
                    }
                }
                _ => return Some(token),
            }
        }

        None
    }
}
