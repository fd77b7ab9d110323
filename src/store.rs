//! Tracking Store - SQLite-based persistence for tracked items and subscriptions
//!
//! This module owns the set of tracked items (release watches, issue watches,
//! star watches), their subscribers and notification destinations, and the
//! last-seen markers the change detector diffs against.
//!
//! The database is stored in XDG_DATA_HOME/repowatch/tracking.db. Access is
//! serialized through a mutex around the connection, so the poll loop and the
//! interactive subscribe/unsubscribe path can share one store safely.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Watch kinds that apply to a repository subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Releases,
    Issues,
}

/// Unique key of a tracked item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    /// Watch for new releases of a repository
    Releases { owner: String, repo: String },
    /// Watch for newly opened issues of a repository
    Issues { owner: String, repo: String },
    /// Watch a GitHub account's starred-repository set
    Stars { account: String },
}

impl ItemKey {
    pub fn repo_watch(kind: WatchKind, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        match kind {
            WatchKind::Releases => ItemKey::Releases {
                owner: owner.into(),
                repo: repo.into(),
            },
            WatchKind::Issues => ItemKey::Issues {
                owner: owner.into(),
                repo: repo.into(),
            },
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ItemKey::Releases { .. } => "releases",
            ItemKey::Issues { .. } => "issues",
            ItemKey::Stars { .. } => "stars",
        }
    }

    /// Identity column value: "owner/repo" for repo watches, the account
    /// login for star watches.
    pub fn ident(&self) -> String {
        match self {
            ItemKey::Releases { owner, repo } | ItemKey::Issues { owner, repo } => {
                format!("{}/{}", owner, repo)
            }
            ItemKey::Stars { account } => account.clone(),
        }
    }

    fn from_columns(kind: &str, ident: &str) -> Result<Self> {
        match kind {
            "stars" => Ok(ItemKey::Stars {
                account: ident.to_string(),
            }),
            "releases" | "issues" => {
                let (owner, repo) = ident
                    .split_once('/')
                    .ok_or_else(|| anyhow!("Malformed item identity: {}", ident))?;
                Ok(ItemKey::repo_watch(
                    if kind == "releases" {
                        WatchKind::Releases
                    } else {
                        WatchKind::Issues
                    },
                    owner,
                    repo,
                ))
            }
            other => Err(anyhow!("Unknown item kind: {}", other)),
        }
    }

    /// Human-readable label for logs and the tracking-stopped notice
    pub fn label(&self) -> String {
        match self {
            ItemKey::Releases { owner, repo } => format!("{}/{} releases", owner, repo),
            ItemKey::Issues { owner, repo } => format!("{}/{} issues", owner, repo),
            ItemKey::Stars { account } => format!("stars of @{}", account),
        }
    }
}

/// Last-seen state used to decide whether a fetched snapshot is new.
///
/// `None` at the item level means no baseline has been established yet;
/// the first successful poll seeds the marker without notifying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    /// Id of the most recently seen release or issue
    Latest(String),
    /// Full set of starred-repository ids from the last poll
    StarSet(BTreeSet<String>),
}

/// Where a notification is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Direct message to a user
    User(i64),
    /// Channel or group chat
    Channel(i64),
    /// A forum topic thread within a group
    Topic { chat_id: i64, thread_id: i64 },
}

impl Destination {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Destination::User(_) => "user",
            Destination::Channel(_) => "channel",
            Destination::Topic { .. } => "topic",
        }
    }

    /// Chat id plus optional thread id. Two destinations with the same
    /// delivery key receive the same message, so the dispatcher collapses
    /// them (a legacy user row and a channel row can share a chat id).
    pub fn delivery_key(&self) -> (i64, Option<i64>) {
        match self {
            Destination::User(id) | Destination::Channel(id) => (*id, None),
            Destination::Topic { chat_id, thread_id } => (*chat_id, Some(*thread_id)),
        }
    }

    // thread_id 0 in the subscriptions table means "no topic thread";
    // SQLite treats NULLs as distinct in unique indexes, which would break
    // subscription idempotency.
    fn to_columns(self) -> (&'static str, i64, i64) {
        match self {
            Destination::User(id) => ("user", id, 0),
            Destination::Channel(id) => ("channel", id, 0),
            Destination::Topic { chat_id, thread_id } => ("topic", chat_id, thread_id),
        }
    }

    fn from_columns(kind: &str, chat_id: i64, thread_id: i64) -> Result<Self> {
        match kind {
            "user" => Ok(Destination::User(chat_id)),
            "channel" => Ok(Destination::Channel(chat_id)),
            "topic" => Ok(Destination::Topic { chat_id, thread_id }),
            other => Err(anyhow!("Unknown destination kind: {}", other)),
        }
    }
}

/// A tracked item with its subscription state, as seen by the poll loop
#[derive(Debug, Clone)]
pub struct TrackedItem {
    pub id: i64,
    pub key: ItemKey,
    pub marker: Option<Marker>,
    pub not_found_count: u32,
    /// Subscriber identities, used for credential resolution
    pub subscribers: Vec<i64>,
    /// Distinct destinations across all subscribers
    pub destinations: Vec<Destination>,
}

/// Tracking database manager
pub struct TrackerDb {
    conn: Mutex<Connection>,
}

impl TrackerDb {
    /// Open or create the tracking database at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        info!("Tracking database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Tracked item table: one row per (kind, identity)
            CREATE TABLE IF NOT EXISTS tracked_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                ident TEXT NOT NULL,
                marker TEXT,
                not_found_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(kind, ident)
            );

            -- Subscription table: (item, subscriber, destination) rows
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES tracked_items(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                dest_kind TEXT NOT NULL,
                chat_id INTEGER NOT NULL,
                thread_id INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(item_id, user_id, dest_kind, chat_id, thread_id)
            );

            CREATE INDEX IF NOT EXISTS idx_items_key ON tracked_items(kind, ident);
            CREATE INDEX IF NOT EXISTS idx_subs_item ON subscriptions(item_id);
            CREATE INDEX IF NOT EXISTS idx_subs_user ON subscriptions(user_id);
            "#,
        )
        .context("Failed to initialize database schema")?;

        debug!("Tracking schema initialized");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a previous holder panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Add a subscription, creating the tracked item if it does not exist.
    /// Idempotent: re-adding an existing subscription is a no-op.
    pub fn add_subscription(
        &self,
        key: &ItemKey,
        user_id: i64,
        destination: &Destination,
    ) -> Result<()> {
        let conn = self.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO tracked_items (kind, ident, marker, not_found_count, updated_at)
            VALUES (?1, ?2, NULL, 0, ?3)
            ON CONFLICT(kind, ident) DO NOTHING
            "#,
            params![key.kind_str(), key.ident(), now],
        )
        .context("Failed to insert tracked item")?;

        let item_id: i64 = conn
            .query_row(
                "SELECT id FROM tracked_items WHERE kind = ?1 AND ident = ?2",
                params![key.kind_str(), key.ident()],
                |row| row.get(0),
            )
            .context("Failed to look up tracked item after insert")?;

        let (dest_kind, chat_id, thread_id) = destination.to_columns();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO subscriptions (item_id, user_id, dest_kind, chat_id, thread_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![item_id, user_id, dest_kind, chat_id, thread_id, now],
        )
        .context("Failed to insert subscription")?;

        debug!(
            "Subscription added: {} user={} dest={:?}",
            key.label(),
            user_id,
            destination
        );
        Ok(())
    }

    /// Remove a user's release and issue subscriptions for a repository.
    ///
    /// The tracked item itself is left in place even if orphaned; the
    /// periodic purge pass deletes items with no remaining subscriptions.
    pub fn remove_subscription(&self, user_id: i64, owner: &str, repo: &str) -> Result<usize> {
        let conn = self.lock();
        let ident = format!("{}/{}", owner, repo);

        let removed = conn
            .execute(
                r#"
                DELETE FROM subscriptions
                WHERE user_id = ?1
                  AND item_id IN (
                    SELECT id FROM tracked_items
                    WHERE ident = ?2 AND kind IN ('releases', 'issues')
                  )
                "#,
                params![user_id, ident],
            )
            .context("Failed to remove subscriptions")?;

        debug!(
            "Removed {} subscription rows for user={} repo={}",
            removed, user_id, ident
        );
        Ok(removed)
    }

    /// Remove a user's star-watch subscription for an account
    pub fn remove_star_watch(&self, user_id: i64, account: &str) -> Result<usize> {
        let conn = self.lock();

        let removed = conn
            .execute(
                r#"
                DELETE FROM subscriptions
                WHERE user_id = ?1
                  AND item_id IN (
                    SELECT id FROM tracked_items WHERE kind = 'stars' AND ident = ?2
                  )
                "#,
                params![user_id, account],
            )
            .context("Failed to remove star watch")?;

        Ok(removed)
    }

    /// Distinct (owner, repo) pairs a user watches, collapsing watch kinds.
    /// Star watches are excluded from this display listing.
    pub fn list_repos_of(&self, user_id: i64) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT t.ident
            FROM tracked_items t
            JOIN subscriptions s ON s.item_id = t.id
            WHERE s.user_id = ?1 AND t.kind IN ('releases', 'issues')
            ORDER BY t.ident
            "#,
        )?;

        let idents = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))
            .context("Failed to query user repositories")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect user repositories")?;

        Ok(idents
            .into_iter()
            .filter_map(|ident| {
                ident
                    .split_once('/')
                    .map(|(o, r)| (o.to_string(), r.to_string()))
            })
            .collect())
    }

    /// Number of tracked items (repositories and star watches) a user
    /// subscribes to
    pub fn subscription_count(&self, user_id: i64) -> Result<u32> {
        let conn = self.lock();
        let count: u32 = conn
            .query_row(
                "SELECT COUNT(DISTINCT item_id) FROM subscriptions WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .context("Failed to count subscriptions")?;
        Ok(count)
    }

    // =========================================================================
    // Poll Loop Operations
    // =========================================================================

    /// Every tracked item with its subscriber and destination sets
    pub fn list_all(&self) -> Result<Vec<TrackedItem>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT id, kind, ident, marker, not_found_count FROM tracked_items ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .context("Failed to query tracked items")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect tracked items")?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, kind, ident, marker_json, not_found_count) in rows {
            let key = ItemKey::from_columns(&kind, &ident)?;
            let marker = marker_json
                .map(|json| serde_json::from_str(&json).context("Failed to decode marker"))
                .transpose()?;

            let (subscribers, destinations) = Self::subscription_state(&conn, id)?;
            items.push(TrackedItem {
                id,
                key,
                marker,
                not_found_count,
                subscribers,
                destinations,
            });
        }

        Ok(items)
    }

    /// Look up a single tracked item by key; `Ok(None)` when absent
    pub fn get_item(&self, key: &ItemKey) -> Result<Option<TrackedItem>> {
        let conn = self.lock();

        let row = conn
            .query_row(
                "SELECT id, marker, not_found_count FROM tracked_items WHERE kind = ?1 AND ident = ?2",
                params![key.kind_str(), key.ident()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query tracked item")?;

        let Some((id, marker_json, not_found_count)) = row else {
            return Ok(None);
        };

        let marker = marker_json
            .map(|json| serde_json::from_str(&json).context("Failed to decode marker"))
            .transpose()?;
        let (subscribers, destinations) = Self::subscription_state(&conn, id)?;

        Ok(Some(TrackedItem {
            id,
            key: key.clone(),
            marker,
            not_found_count,
            subscribers,
            destinations,
        }))
    }

    fn subscription_state(conn: &Connection, item_id: i64) -> Result<(Vec<i64>, Vec<Destination>)> {
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT user_id, dest_kind, chat_id, thread_id
            FROM subscriptions
            WHERE item_id = ?1
            ORDER BY user_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![item_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .context("Failed to query subscriptions")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect subscriptions")?;

        let mut subscribers = Vec::new();
        let mut destinations = Vec::new();
        for (user_id, dest_kind, chat_id, thread_id) in rows {
            if !subscribers.contains(&user_id) {
                subscribers.push(user_id);
            }
            let dest = Destination::from_columns(&dest_kind, chat_id, thread_id)?;
            if !destinations.contains(&dest) {
                destinations.push(dest);
            }
        }

        Ok((subscribers, destinations))
    }

    /// Overwrite the last-seen marker for an item. A no-op for unknown ids.
    pub fn update_marker(&self, item_id: i64, marker: &Marker) -> Result<()> {
        let conn = self.lock();
        let json = serde_json::to_string(marker).context("Failed to encode marker")?;

        conn.execute(
            "UPDATE tracked_items SET marker = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Utc::now().to_rfc3339(), item_id],
        )
        .context("Failed to update marker")?;

        Ok(())
    }

    /// Bump the consecutive not-found counter and return the new value.
    /// Returns 0 when the item no longer exists.
    pub fn increment_not_found(&self, item_id: i64) -> Result<u32> {
        let conn = self.lock();

        conn.execute(
            "UPDATE tracked_items SET not_found_count = not_found_count + 1, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), item_id],
        )
        .context("Failed to increment failure counter")?;

        let count = conn
            .query_row(
                "SELECT not_found_count FROM tracked_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read failure counter")?
            .unwrap_or(0);

        Ok(count)
    }

    /// Reset the consecutive not-found counter after a successful check
    pub fn reset_not_found(&self, item_id: i64) -> Result<()> {
        let conn = self.lock();

        conn.execute(
            "UPDATE tracked_items SET not_found_count = 0 WHERE id = ?1 AND not_found_count != 0",
            params![item_id],
        )
        .context("Failed to reset failure counter")?;

        Ok(())
    }

    /// Delete an item and all its subscriptions (failure escalation)
    pub fn remove_item(&self, item_id: i64) -> Result<()> {
        let conn = self.lock();

        // Explicit subscription delete in case foreign_keys is off for this
        // connection.
        conn.execute(
            "DELETE FROM subscriptions WHERE item_id = ?1",
            params![item_id],
        )
        .context("Failed to delete subscriptions")?;
        conn.execute("DELETE FROM tracked_items WHERE id = ?1", params![item_id])
            .context("Failed to delete tracked item")?;

        Ok(())
    }

    /// Delete tracked items with no remaining subscriptions.
    /// Run periodically rather than on every unsubscribe.
    pub fn purge_orphans(&self) -> Result<usize> {
        let conn = self.lock();

        let purged = conn
            .execute(
                "DELETE FROM tracked_items WHERE id NOT IN (SELECT DISTINCT item_id FROM subscriptions)",
                [],
            )
            .context("Failed to purge orphaned items")?;

        if purged > 0 {
            info!("Purged {} orphaned tracked items", purged);
        }
        Ok(purged)
    }
}
