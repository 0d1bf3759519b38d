//! Local cache of server-authoritative records
//!
//! The cache is read-model only: it is written exclusively from
//! server-confirmed changes, last-writer-wins on `server_timestamp`.
//! Deletes are tombstones, so a stale change arriving after a delete
//! cannot resurrect the record.

use libsql::{params, Connection};
use serde_json::Value;

use crate::error::Result;
use crate::models::SyncTable;
use crate::protocol::ServerChange;

/// One cached record as read back from the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRecord {
    pub table: SyncTable,
    pub id: String,
    pub data: Value,
    pub updated_at: i64,
    pub is_deleted: bool,
}

/// Trait for the local record cache
pub trait RecordCache {
    /// Fold one server-confirmed change into the cache
    async fn apply_change(&self, change: &ServerChange) -> Result<()>;

    /// Fetch a record; tombstoned records come back with `is_deleted` set
    async fn get(&self, table: SyncTable, id: &str) -> Result<Option<CachedRecord>>;

    /// List live records of one table, most recently updated first
    async fn list(&self, table: SyncTable) -> Result<Vec<CachedRecord>>;
}

/// libSQL implementation of `RecordCache`
pub struct LibSqlRecordCache<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordCache<'a> {
    /// Create a new cache with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(table: SyncTable, row: &libsql::Row) -> Result<CachedRecord> {
        let data: String = row.get(1)?;
        Ok(CachedRecord {
            table,
            id: row.get(0)?,
            data: serde_json::from_str(&data)?,
            updated_at: row.get(2)?,
            is_deleted: row.get::<i64>(3)? != 0,
        })
    }
}

impl RecordCache for LibSqlRecordCache<'_> {
    async fn apply_change(&self, change: &ServerChange) -> Result<()> {
        let Some(record_id) = change.record_id() else {
            // A change without an id cannot be addressed; skip it rather
            // than abort the cycle.
            tracing::warn!(table = change.table.as_str(), "Server change without record id, skipping");
            return Ok(());
        };

        let is_deleted = i64::from(matches!(change.kind, crate::models::OperationKind::Delete));

        // Last writer wins on the server's clock. Out-of-order delivery of
        // an older change must not clobber a newer row.
        self.conn
            .execute(
                "INSERT INTO records (tbl, id, data, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (tbl, id) DO UPDATE SET
                     data = excluded.data,
                     updated_at = excluded.updated_at,
                     is_deleted = excluded.is_deleted
                 WHERE excluded.updated_at >= records.updated_at",
                params![
                    change.table.as_str(),
                    record_id,
                    change.data.to_string(),
                    change.server_timestamp,
                    is_deleted,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, table: SyncTable, id: &str) -> Result<Option<CachedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, data, updated_at, is_deleted FROM records
                 WHERE tbl = ? AND id = ?",
                params![table.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(table, &row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, table: SyncTable) -> Result<Vec<CachedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, data, updated_at, is_deleted FROM records
                 WHERE tbl = ? AND is_deleted = 0
                 ORDER BY updated_at DESC",
                params![table.as_str()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(table, &row)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::OperationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn change(id: &str, kind: OperationKind, ts: i64) -> ServerChange {
        ServerChange {
            table: SyncTable::Accounts,
            kind,
            data: json!({"id": id, "name": "Checking", "ts": ts}),
            server_timestamp: ts,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = LibSqlRecordCache::new(db.connection());

        cache
            .apply_change(&change("acct-1", OperationKind::Create, 100))
            .await
            .unwrap();

        let record = cache.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert_eq!(record.updated_at, 100);
        assert!(!record.is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_change_wins() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = LibSqlRecordCache::new(db.connection());

        cache
            .apply_change(&change("acct-1", OperationKind::Create, 100))
            .await
            .unwrap();
        cache
            .apply_change(&change("acct-1", OperationKind::Update, 200))
            .await
            .unwrap();

        let record = cache.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert_eq!(record.updated_at, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_change_does_not_clobber() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = LibSqlRecordCache::new(db.connection());

        cache
            .apply_change(&change("acct-1", OperationKind::Update, 200))
            .await
            .unwrap();
        cache
            .apply_change(&change("acct-1", OperationKind::Update, 100))
            .await
            .unwrap();

        let record = cache.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert_eq!(record.updated_at, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_tombstones_and_hides_from_list() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = LibSqlRecordCache::new(db.connection());

        cache
            .apply_change(&change("acct-1", OperationKind::Create, 100))
            .await
            .unwrap();
        cache
            .apply_change(&change("acct-2", OperationKind::Create, 100))
            .await
            .unwrap();
        cache
            .apply_change(&change("acct-1", OperationKind::Delete, 200))
            .await
            .unwrap();

        let listed = cache.list(SyncTable::Accounts).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "acct-2");

        let tombstone = cache.get(SyncTable::Accounts, "acct-1").await.unwrap().unwrap();
        assert!(tombstone.is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_without_record_id_is_skipped() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = LibSqlRecordCache::new(db.connection());

        let malformed = ServerChange {
            table: SyncTable::Accounts,
            kind: OperationKind::Update,
            data: json!({"name": "nameless"}),
            server_timestamp: 100,
        };
        cache.apply_change(&malformed).await.unwrap();

        assert!(cache.list(SyncTable::Accounts).await.unwrap().is_empty());
    }
}
