//! Recorded-conflict repository
//!
//! Conflicts reported by the server are persisted until the user resolves
//! them. A conflict row is keyed by the refused operation's id.

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{Conflict, OperationId};

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Persist a conflict reported by the server
    async fn save(&self, conflict: &Conflict) -> Result<()>;

    /// Fetch one conflict by the refused operation's id
    async fn get(&self, operation_id: &OperationId) -> Result<Option<Conflict>>;

    /// List unresolved conflicts, newest first
    async fn list(&self) -> Result<Vec<Conflict>>;

    /// Drop a conflict once resolved
    async fn delete(&self, operation_id: &OperationId) -> Result<()>;

    /// Number of unresolved conflicts
    async fn count(&self) -> Result<usize>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &libsql::Row) -> Result<Conflict> {
        let operation_id: String = row.get(0)?;
        let tbl: String = row.get(1)?;
        let conflict_type: String = row.get(2)?;
        let client_data: String = row.get(3)?;
        let server_data: String = row.get(4)?;

        Ok(Conflict {
            operation_id: operation_id
                .parse()
                .map_err(|_| Error::Database("corrupt conflict row: invalid operation id".into()))?,
            table: tbl
                .parse()
                .map_err(|_| Error::Database("corrupt conflict row: invalid table".into()))?,
            conflict_type: conflict_type
                .parse()
                .map_err(|_| Error::Database("corrupt conflict row: invalid type".into()))?,
            client_data: serde_json::from_str(&client_data)?,
            server_data: serde_json::from_str(&server_data)?,
            client_timestamp: row.get(5)?,
            server_timestamp: row.get(6)?,
        })
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn save(&self, conflict: &Conflict) -> Result<()> {
        // Replays of an already-recorded conflict overwrite in place.
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_conflicts
                     (operation_id, tbl, conflict_type, client_data, server_data,
                      client_timestamp, server_timestamp, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    conflict.operation_id.as_str(),
                    conflict.table.as_str(),
                    conflict.conflict_type.as_str(),
                    conflict.client_data.to_string(),
                    conflict.server_data.to_string(),
                    conflict.client_timestamp,
                    conflict.server_timestamp,
                    chrono::Utc::now().timestamp_millis(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, operation_id: &OperationId) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT operation_id, tbl, conflict_type, client_data, server_data,
                        client_timestamp, server_timestamp
                 FROM sync_conflicts WHERE operation_id = ?",
                params![operation_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT operation_id, tbl, conflict_type, client_data, server_data,
                        client_timestamp, server_timestamp
                 FROM sync_conflicts ORDER BY created_at DESC",
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn delete(&self, operation_id: &OperationId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM sync_conflicts WHERE operation_id = ?",
                params![operation_id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_conflicts", ())
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("count query returned no rows".into()))?;
        Ok(usize::try_from(row.get::<i64>(0)?).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ConflictType, SyncTable};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict() -> Conflict {
        Conflict {
            operation_id: OperationId::new(),
            table: SyncTable::Goals,
            conflict_type: ConflictType::UpdateConflict,
            client_data: json!({"id": "goal-1", "target": 500}),
            server_data: json!({"id": "goal-1", "target": 750}),
            client_timestamp: 100,
            server_timestamp: 200,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_and_get_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let original = conflict();
        repo.save(&original).await.unwrap();

        let loaded = repo.get(&original.operation_id).await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_replaces_on_replay() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let mut original = conflict();
        repo.save(&original).await.unwrap();

        original.server_timestamp = 300;
        repo.save(&original).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let loaded = repo.get(&original.operation_id).await.unwrap().unwrap();
        assert_eq!(loaded.server_timestamp, 300);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_resolved_conflict() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let original = conflict();
        repo.save(&original).await.unwrap();
        repo.delete(&original.operation_id).await.unwrap();

        assert!(repo.get(&original.operation_id).await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn null_server_data_survives_storage() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let mut deleted_base = conflict();
        deleted_base.conflict_type = ConflictType::DeleteConflict;
        deleted_base.server_data = serde_json::Value::Null;
        repo.save(&deleted_base).await.unwrap();

        let loaded = repo.get(&deleted_base.operation_id).await.unwrap().unwrap();
        assert!(loaded.server_data.is_null());
    }
}
