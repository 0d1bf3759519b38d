//! Server-side storage: authoritative records and the replay ledger
//!
//! The server owns record truth. Every record row carries its owning user,
//! its last-modified server time, and a soft-delete flag; deletes tombstone
//! so concurrent editors get a conflict instead of a silent resurrection.

use std::sync::Arc;

use libsql::{params, Builder, Connection};
use tokio::sync::Mutex;

use keel_core::models::{OperationId, SyncTable};

use crate::error::AppError;

const CURRENT_VERSION: i32 = 1;

/// Cloneable handle over the server database
#[derive(Clone)]
pub struct ServerStore {
    inner: Arc<Mutex<ServerDb>>,
}

pub struct ServerDb {
    _db: libsql::Database,
    conn: Connection,
}

impl ServerDb {
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl ServerStore {
    /// Open the store at the given path, migrating as needed
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
        migrate(&conn).await?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ServerDb { _db: db, conn })),
        })
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self, AppError> {
        Self::open(":memory:").await
    }

    /// Lock the store for exclusive use.
    ///
    /// The sync processor holds this across a whole request so a request's
    /// transaction is never interleaved with another. The lock is global,
    /// so exchanges serialize across all users, not just within one: a
    /// single local libsql connection cannot run concurrent transactions,
    /// and serialized exchanges are what let timestamp assignment read the
    /// issued cursors without racing. Sharding the lock per user would need
    /// a connection pool first.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ServerDb> {
        self.inner.lock().await
    }
}

async fn migrate(conn: &Connection) -> Result<(), AppError> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;
    let exists = rows
        .next()
        .await?
        .is_some_and(|row| row.get::<i32>(0).unwrap_or(0) != 0);

    let version = if exists {
        let mut rows = conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?;
        rows.next()
            .await?
            .map_or(0, |row| row.get::<i32>(0).unwrap_or(0))
    } else {
        0
    };

    if version < 1 {
        migrate_v1(conn).await?;
    }
    Ok(())
}

async fn migrate_v1(conn: &Connection) -> Result<(), AppError> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Authoritative records, soft-deleted via tombstones
        "CREATE TABLE IF NOT EXISTS records (
            tbl TEXT NOT NULL,
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (tbl, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_records_user_updated ON records(user_id, updated_at)",
        // Replay ledger; an operation id in here applied exactly once
        "CREATE TABLE IF NOT EXISTS applied_operations (
            operation_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        // Per-device cursors, scoped to their owning user
        "CREATE TABLE IF NOT EXISTS sync_sessions (
            user_id TEXT NOT NULL,
            device_id TEXT NOT NULL,
            last_sync_timestamp INTEGER,
            in_progress INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, device_id)
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated server database to version {CURRENT_VERSION}");
    Ok(())
}

/// One authoritative record row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub table: SyncTable,
    pub id: String,
    pub user_id: String,
    pub data: serde_json::Value,
    pub updated_at: i64,
    pub is_deleted: bool,
}

/// Record access over a borrowed connection
pub struct RecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RecordRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, table: SyncTable, id: &str) -> Result<Option<ServerRecord>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, data, updated_at, is_deleted FROM records
                 WHERE tbl = ? AND id = ?",
                params![table.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_record(table, &row)?)),
            None => Ok(None),
        }
    }

    pub async fn upsert(&self, record: &ServerRecord) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT INTO records (tbl, id, user_id, data, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tbl, id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at,
                     is_deleted = excluded.is_deleted",
                params![
                    record.table.as_str(),
                    record.id.as_str(),
                    record.user_id.as_str(),
                    record.data.to_string(),
                    record.updated_at,
                    i64::from(record.is_deleted),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn soft_delete(
        &self,
        table: SyncTable,
        id: &str,
        server_timestamp: i64,
    ) -> Result<(), AppError> {
        self.conn
            .execute(
                "UPDATE records SET is_deleted = 1, updated_at = ? WHERE tbl = ? AND id = ?",
                params![server_timestamp, table.as_str(), id],
            )
            .await?;
        Ok(())
    }

    /// All of one user's records changed strictly after `since`, oldest
    /// first. `None` means a first sync and pulls everything, tombstones
    /// included.
    pub async fn changes_since(
        &self,
        user_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<ServerRecord>, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT tbl, id, user_id, data, updated_at, is_deleted FROM records
                 WHERE user_id = ? AND updated_at > ?
                 ORDER BY updated_at ASC",
                params![user_id, since.unwrap_or(-1)],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let tbl: String = row.get(0)?;
            let Ok(table) = tbl.parse::<SyncTable>() else {
                // Rows written before a table was retired; never served.
                continue;
            };
            let data: String = row.get(3)?;
            records.push(ServerRecord {
                table,
                id: row.get(1)?,
                user_id: row.get(2)?,
                data: serde_json::from_str(&data)
                    .map_err(|e| AppError::Database(format!("corrupt record payload: {e}")))?,
                updated_at: row.get(4)?,
                is_deleted: row.get::<i64>(5)? != 0,
            });
        }
        Ok(records)
    }
}

fn parse_record(table: SyncTable, row: &libsql::Row) -> Result<ServerRecord, AppError> {
    let data: String = row.get(2)?;
    Ok(ServerRecord {
        table,
        id: row.get(0)?,
        user_id: row.get(1)?,
        data: serde_json::from_str(&data)
            .map_err(|e| AppError::Database(format!("corrupt record payload: {e}")))?,
        updated_at: row.get(3)?,
        is_deleted: row.get::<i64>(4)? != 0,
    })
}

/// Replay ledger over a borrowed connection
pub struct OperationLedger<'a> {
    conn: &'a Connection,
}

impl<'a> OperationLedger<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn is_applied(&self, operation_id: &OperationId) -> Result<bool, AppError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM applied_operations WHERE operation_id = ?",
                params![operation_id.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn record_applied(
        &self,
        operation_id: &OperationId,
        user_id: &str,
        applied_at: i64,
    ) -> Result<(), AppError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO applied_operations (operation_id, user_id, applied_at)
                 VALUES (?, ?, ?)",
                params![operation_id.as_str(), user_id, applied_at],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, user_id: &str, updated_at: i64) -> ServerRecord {
        ServerRecord {
            table: SyncTable::Accounts,
            id: id.to_string(),
            user_id: user_id.to_string(),
            data: json!({"id": id, "name": "Checking"}),
            updated_at,
            is_deleted: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_get_round_trip() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = RecordRepository::new(db.connection());

        let original = record("acct-1", "user-a", 100);
        repo.upsert(&original).await.unwrap();

        let loaded = repo.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn soft_delete_tombstones() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = RecordRepository::new(db.connection());

        repo.upsert(&record("acct-1", "user-a", 100)).await.unwrap();
        repo.soft_delete(SyncTable::Accounts, "acct-1", 200)
            .await
            .unwrap();

        let loaded = repo.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert!(loaded.is_deleted);
        assert_eq!(loaded.updated_at, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changes_since_scopes_by_user_and_cursor() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let repo = RecordRepository::new(db.connection());

        repo.upsert(&record("acct-1", "user-a", 100)).await.unwrap();
        repo.upsert(&record("acct-2", "user-a", 200)).await.unwrap();
        repo.upsert(&record("acct-3", "user-b", 300)).await.unwrap();

        // First sync pulls everything the user owns, nobody else's rows.
        let all = repo.changes_since("user-a", None).await.unwrap();
        assert_eq!(all.len(), 2);

        // Cursor bounds are strict.
        let after = repo.changes_since("user-a", Some(100)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "acct-2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ledger_remembers_applied_operations() {
        let store = ServerStore::open_in_memory().await.unwrap();
        let db = store.lock().await;
        let ledger = OperationLedger::new(db.connection());

        let id = OperationId::new();
        assert!(!ledger.is_applied(&id).await.unwrap());

        ledger.record_applied(&id, "user-a", 100).await.unwrap();
        assert!(ledger.is_applied(&id).await.unwrap());

        // Recording twice is a no-op.
        ledger.record_applied(&id, "user-a", 200).await.unwrap();
        assert!(ledger.is_applied(&id).await.unwrap());
    }
}
