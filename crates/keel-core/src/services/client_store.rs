//! Client-side store service
//!
//! Owns the on-device database and exposes the outbox, conflict, cache,
//! and cursor operations behind one cloneable handle. All locking happens
//! here; repositories stay synchronous over a borrowed connection.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    CachedRecord, ConflictRepository, CursorRepository, Database, LibSqlConflictRepository,
    LibSqlCursorRepository, LibSqlOutboxRepository, LibSqlRecordCache, OutboxCounts,
    OutboxRepository, RecordCache, SyncCursor,
};
use crate::error::Result;
use crate::models::{Conflict, Operation, OperationId, SyncTable};
use crate::protocol::ServerChange;

/// Cloneable handle over the on-device store
#[derive(Clone)]
pub struct ClientStore {
    db: Arc<Mutex<Database>>,
}

impl ClientStore {
    /// Open the store at the given path, migrating as needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    // Outbox

    /// Queue a mutation for the next sync cycle
    pub async fn enqueue(&self, op: &Operation) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).enqueue(op).await
    }

    /// Select the next submittable batch
    pub async fn next_batch(&self, limit: usize, now: i64) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .next_batch(limit, now)
            .await
    }

    /// Drop operations the server confirmed
    pub async fn remove_operations(&self, ids: &[OperationId]) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).remove(ids).await
    }

    /// Push an operation's next attempt out after a retryable failure
    pub async fn schedule_retry(
        &self,
        id: &OperationId,
        error: &str,
        retry_at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .schedule_retry(id, error, retry_at)
            .await
    }

    /// Mark an operation permanently failed
    pub async fn mark_failed(&self, id: &OperationId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_failed(id, error)
            .await
    }

    /// Park an operation awaiting conflict resolution
    pub async fn mark_conflicted(&self, id: &OperationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_conflicted(id)
            .await
    }

    /// Submission attempts recorded for an operation
    pub async fn attempts(&self, id: &OperationId) -> Result<u32> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).attempts(id).await
    }

    /// Outbox occupancy counts
    pub async fn outbox_counts(&self) -> Result<OutboxCounts> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).counts().await
    }

    /// List permanently failed operations
    pub async fn list_failed(&self, limit: usize) -> Result<Vec<Operation>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .list_failed(limit)
            .await
    }

    // Conflicts

    /// Persist a conflict reported by the server
    pub async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).save(conflict).await
    }

    /// Fetch one recorded conflict
    pub async fn get_conflict(&self, operation_id: &OperationId) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .get(operation_id)
            .await
    }

    /// List unresolved conflicts, newest first
    pub async fn list_conflicts(&self) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).list().await
    }

    /// Drop a conflict once resolved
    pub async fn delete_conflict(&self, operation_id: &OperationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .delete(operation_id)
            .await
    }

    // Record cache

    /// Fold one server-confirmed change into the local cache
    pub async fn apply_server_change(&self, change: &ServerChange) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordCache::new(db.connection()).apply_change(change).await
    }

    /// Fetch one cached record
    pub async fn get_record(&self, table: SyncTable, id: &str) -> Result<Option<CachedRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordCache::new(db.connection()).get(table, id).await
    }

    /// List live cached records of one table
    pub async fn list_records(&self, table: SyncTable) -> Result<Vec<CachedRecord>> {
        let db = self.db.lock().await;
        LibSqlRecordCache::new(db.connection()).list(table).await
    }

    // Cursor

    /// Load the device cursor, creating it on first use
    pub async fn cursor(&self) -> Result<SyncCursor> {
        let db = self.db.lock().await;
        LibSqlCursorRepository::new(db.connection()).ensure().await
    }

    /// Advance the cursor to a server-assigned timestamp
    pub async fn advance_cursor(&self, server_timestamp: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCursorRepository::new(db.connection())
            .advance(server_timestamp)
            .await
    }

    /// Record the outcome error of a failed cycle
    pub async fn record_sync_error(&self, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCursorRepository::new(db.connection())
            .record_error(error)
            .await
    }

    /// Forget the cursor so the next sync pulls the entire dataset
    pub async fn reset_cursor(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCursorRepository::new(db.connection()).reset().await
    }
}
