//! Credential Store - per-user GitHub tokens
//!
//! Tracked polling always runs under a subscriber's personal token, so the
//! store maps subscriber ids to tokens. Storage is a small SQLite table in
//! XDG_DATA_HOME/repowatch/tokens.db; encryption of the token material is a
//! deployment concern outside this crate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Read side of the credential store, as consumed by the resolver
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Token for a subscriber, `Ok(None)` when the user has none stored
    async fn credential_for(&self, user_id: i64) -> Result<Option<String>>;
}

/// SQLite-backed token store
pub struct TokenDb {
    conn: Mutex<Connection>,
}

impl TokenDb {
    /// Open or create the token database at a specific path
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

        info!("Token database opened at {}", path.display());
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

    fn initialize(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS user_tokens (
                    user_id INTEGER PRIMARY KEY,
                    token TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    last_used TEXT NOT NULL
                );
                "#,
            )
            .context("Failed to initialize token schema")?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store or replace a user's token
    pub fn store_token(&self, user_id: i64, token: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.lock()
            .execute(
                r#"
                INSERT INTO user_tokens (user_id, token, created_at, last_used)
                VALUES (?1, ?2, ?3, ?3)
                ON CONFLICT(user_id) DO UPDATE SET token = ?2, last_used = ?3
                "#,
                params![user_id, token, now],
            )
            .context("Failed to store token")?;

        debug!("Token stored for user {}", user_id);
        Ok(())
    }

    /// Remove a user's token; returns whether one existed
    pub fn remove_token(&self, user_id: i64) -> Result<bool> {
        let removed = self
            .lock()
            .execute("DELETE FROM user_tokens WHERE user_id = ?1", params![user_id])
            .context("Failed to remove token")?;
        Ok(removed > 0)
    }

    /// Whether a user has a stored token
    pub fn token_exists(&self, user_id: i64) -> Result<bool> {
        let exists: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM user_tokens WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check token existence")?;
        Ok(exists.is_some())
    }

    fn get_token(&self, user_id: i64) -> Result<Option<String>> {
        let conn = self.lock();
        let token: Option<String> = conn
            .query_row(
                "SELECT token FROM user_tokens WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query token")?;

        if token.is_some() {
            conn.execute(
                "UPDATE user_tokens SET last_used = ?1 WHERE user_id = ?2",
                params![Utc::now().to_rfc3339(), user_id],
            )
            .context("Failed to update last_used")?;
        }

        Ok(token)
    }
}

#[async_trait]
impl CredentialStore for TokenDb {
    async fn credential_for(&self, user_id: i64) -> Result<Option<String>> {
        self.get_token(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_roundtrip() {
        let db = TokenDb::open_in_memory().unwrap();

        assert!(db.credential_for(100).await.unwrap().is_none());
        assert!(!db.token_exists(100).unwrap());

        db.store_token(100, "ghp_first").unwrap();
        assert!(db.token_exists(100).unwrap());
        assert_eq!(
            db.credential_for(100).await.unwrap(),
            Some("ghp_first".to_string())
        );

        // Replacing overwrites
        db.store_token(100, "ghp_second").unwrap();
        assert_eq!(
            db.credential_for(100).await.unwrap(),
            Some("ghp_second".to_string())
        );
    }

    #[tokio::test]
    async fn test_remove_token() {
        let db = TokenDb::open_in_memory().unwrap();

        assert!(!db.remove_token(100).unwrap());

        db.store_token(100, "ghp_token").unwrap();
        assert!(db.remove_token(100).unwrap());
        assert!(db.credential_for(100).await.unwrap().is_none());
    }
}
