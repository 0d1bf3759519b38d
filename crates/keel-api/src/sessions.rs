//! Per-device sync sessions
//!
//! One row per (user, device): the device's server-assigned cursor and
//! whether a sync request from it is currently being processed. Cursors
//! only ever move forward.

use libsql::{params, Connection};

use crate::error::AppError;

/// One device's session row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    pub user_id: String,
    pub device_id: String,
    pub last_sync_timestamp: Option<i64>,
    pub in_progress: bool,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

/// Session access over a borrowed connection
pub struct SessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SessionRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn get(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<SyncSession>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_sync_timestamp, in_progress, last_error, updated_at
                 FROM sync_sessions WHERE user_id = ? AND device_id = ?",
                params![user_id, device_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(SyncSession {
                user_id: user_id.to_string(),
                device_id: device_id.to_string(),
                last_sync_timestamp: row.get(0)?,
                in_progress: row.get::<i64>(1)? != 0,
                last_error: row.get(2)?,
                updated_at: row.get(3)?,
            })),
            None => Ok(None),
        }
    }

    /// Flag that a request from this device is being processed
    pub async fn begin(&self, user_id: &str, device_id: &str, now: i64) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT INTO sync_sessions (user_id, device_id, last_sync_timestamp, in_progress, last_error, updated_at)
                 VALUES (?, ?, NULL, 1, NULL, ?)
                 ON CONFLICT (user_id, device_id) DO UPDATE SET
                     in_progress = 1,
                     updated_at = excluded.updated_at",
                params![user_id, device_id, now],
            )
            .await?;
        Ok(())
    }

    /// Record a completed exchange: advance the cursor (never backwards)
    /// and clear the in-progress flag.
    pub async fn complete(
        &self,
        user_id: &str,
        device_id: &str,
        server_timestamp: i64,
    ) -> Result<(), AppError> {
        self.conn
            .execute(
                "UPDATE sync_sessions SET
                     last_sync_timestamp = MAX(COALESCE(last_sync_timestamp, 0), ?),
                     in_progress = 0,
                     last_error = NULL,
                     updated_at = ?
                 WHERE user_id = ? AND device_id = ?",
                params![server_timestamp, server_timestamp, user_id, device_id],
            )
            .await?;
        Ok(())
    }

    /// Record a failed exchange and clear the in-progress flag
    pub async fn fail(
        &self,
        user_id: &str,
        device_id: &str,
        error: &str,
        now: i64,
    ) -> Result<(), AppError> {
        self.conn
            .execute(
                "UPDATE sync_sessions SET in_progress = 0, last_error = ?, updated_at = ?
                 WHERE user_id = ? AND device_id = ?",
                params![error, now, user_id, device_id],
            )
            .await?;
        Ok(())
    }

    /// Highest cursor issued to any of this user's devices
    pub async fn max_cursor(&self, user_id: &str) -> Result<Option<i64>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(last_sync_timestamp) FROM sync_sessions WHERE user_id = ?",
                params![user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    /// Forget a device's cursor; its next sync pulls the full dataset
    pub async fn reset(&self, user_id: &str, device_id: &str) -> Result<bool, AppError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM sync_sessions WHERE user_id = ? AND device_id = ?",
                params![user_id, device_id],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ServerStore;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn begin_then_complete_tracks_cursor() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        repo.begin("user-a", "device-1", 50).await.unwrap();
        let session = repo.get("user-a", "device-1").await.unwrap().unwrap();
        assert!(session.in_progress);
        assert!(session.last_sync_timestamp.is_none());

        repo.complete("user-a", "device-1", 100).await.unwrap();
        let session = repo.get("user-a", "device-1").await.unwrap().unwrap();
        assert!(!session.in_progress);
        assert_eq!(session.last_sync_timestamp, Some(100));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cursor_never_moves_backwards() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        repo.begin("user-a", "device-1", 50).await.unwrap();
        repo.complete("user-a", "device-1", 200).await.unwrap();
        repo.complete("user-a", "device-1", 100).await.unwrap();

        let session = repo.get("user-a", "device-1").await.unwrap().unwrap();
        assert_eq!(session.last_sync_timestamp, Some(200));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sessions_are_scoped_per_user() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        repo.begin("user-a", "device-1", 50).await.unwrap();
        repo.complete("user-a", "device-1", 100).await.unwrap();

        // Same device id under another user is a different session.
        assert!(repo.get("user-b", "device-1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn max_cursor_spans_all_of_a_users_devices() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        assert_eq!(repo.max_cursor("user-a").await.unwrap(), None);

        repo.begin("user-a", "device-1", 50).await.unwrap();
        repo.complete("user-a", "device-1", 100).await.unwrap();
        repo.begin("user-a", "device-2", 50).await.unwrap();
        repo.complete("user-a", "device-2", 300).await.unwrap();
        repo.begin("user-b", "device-1", 50).await.unwrap();
        repo.complete("user-b", "device-1", 900).await.unwrap();

        assert_eq!(repo.max_cursor("user-a").await.unwrap(), Some(300));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_drops_the_session() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        repo.begin("user-a", "device-1", 50).await.unwrap();
        assert!(repo.reset("user-a", "device-1").await.unwrap());
        assert!(repo.get("user-a", "device-1").await.unwrap().is_none());
        assert!(!repo.reset("user-a", "device-1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fail_records_the_error() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = SessionRepository::new(db.connection());

        repo.begin("user-a", "device-1", 50).await.unwrap();
        repo.fail("user-a", "device-1", "storage unavailable", 60)
            .await
            .unwrap();

        let session = repo.get("user-a", "device-1").await.unwrap().unwrap();
        assert!(!session.in_progress);
        assert_eq!(session.last_error.as_deref(), Some("storage unavailable"));
    }
}
