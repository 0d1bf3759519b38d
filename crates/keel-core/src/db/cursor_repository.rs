//! Per-device sync cursor
//!
//! A single-row table holding this device's identity and its
//! server-assigned high-water mark. The cursor only ever moves forward,
//! and only to values the server handed back.

use libsql::{params, Connection};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The device's sync cursor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub device_id: String,
    pub last_sync_timestamp: Option<i64>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

/// Trait for cursor storage operations
pub trait CursorRepository {
    /// Load the cursor, creating one with a fresh device id on first use
    async fn ensure(&self) -> Result<SyncCursor>;

    /// Advance the cursor to a server-assigned timestamp and clear the
    /// recorded error. Never moves backwards.
    async fn advance(&self, server_timestamp: i64) -> Result<()>;

    /// Record the outcome error of a failed cycle
    async fn record_error(&self, error: &str) -> Result<()>;

    /// Drop the cursor so the next sync pulls the entire dataset again.
    /// The device id is kept.
    async fn reset(&self) -> Result<()>;
}

/// libSQL implementation of `CursorRepository`
pub struct LibSqlCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCursorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn load(&self) -> Result<Option<SyncCursor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT device_id, last_sync_timestamp, last_error, updated_at
                 FROM sync_cursor WHERE id = 1",
                (),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(SyncCursor {
                device_id: row.get(0)?,
                last_sync_timestamp: row.get(1)?,
                last_error: row.get(2)?,
                updated_at: row.get(3)?,
            })),
            None => Ok(None),
        }
    }
}

impl CursorRepository for LibSqlCursorRepository<'_> {
    async fn ensure(&self) -> Result<SyncCursor> {
        if let Some(cursor) = self.load().await? {
            return Ok(cursor);
        }

        let device_id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO sync_cursor (id, device_id, last_sync_timestamp, last_error, updated_at)
                 VALUES (1, ?, NULL, NULL, ?)",
                params![device_id.as_str(), now],
            )
            .await?;
        tracing::info!(%device_id, "Assigned new device id");

        self.load()
            .await?
            .ok_or_else(|| Error::Database("cursor row missing after insert".into()))
    }

    async fn advance(&self, server_timestamp: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "UPDATE sync_cursor
                 SET last_sync_timestamp = MAX(COALESCE(last_sync_timestamp, 0), ?),
                     last_error = NULL,
                     updated_at = ?
                 WHERE id = 1",
                params![server_timestamp, now],
            )
            .await?;
        Ok(())
    }

    async fn record_error(&self, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "UPDATE sync_cursor SET last_error = ?, updated_at = ? WHERE id = 1",
                params![error, now],
            )
            .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "UPDATE sync_cursor
                 SET last_sync_timestamp = NULL, last_error = NULL, updated_at = ?
                 WHERE id = 1",
                params![now],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn ensure_creates_once_and_is_stable() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCursorRepository::new(db.connection());

        let first = repo.ensure().await.unwrap();
        assert!(first.last_sync_timestamp.is_none());

        let second = repo.ensure().await.unwrap();
        assert_eq!(first.device_id, second.device_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn advance_moves_forward_only() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCursorRepository::new(db.connection());
        repo.ensure().await.unwrap();

        repo.advance(200).await.unwrap();
        repo.advance(100).await.unwrap();

        let cursor = repo.ensure().await.unwrap();
        assert_eq!(cursor.last_sync_timestamp, Some(200));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn advance_clears_recorded_error() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCursorRepository::new(db.connection());
        repo.ensure().await.unwrap();

        repo.record_error("server unavailable").await.unwrap();
        let cursor = repo.ensure().await.unwrap();
        assert_eq!(cursor.last_error.as_deref(), Some("server unavailable"));

        repo.advance(100).await.unwrap();
        let cursor = repo.ensure().await.unwrap();
        assert!(cursor.last_error.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_clears_cursor_but_keeps_device_id() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCursorRepository::new(db.connection());
        let before = repo.ensure().await.unwrap();

        repo.advance(500).await.unwrap();
        repo.reset().await.unwrap();

        let after = repo.ensure().await.unwrap();
        assert!(after.last_sync_timestamp.is_none());
        assert_eq!(after.device_id, before.device_id);
    }
}
