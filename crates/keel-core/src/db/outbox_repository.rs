//! Durable outbox repository
//!
//! The outbox holds every not-yet-confirmed mutation. Arrival order is the
//! autoincrement `seq`; batches may promote high-priority records ahead of
//! others, but two operations on the same record always leave in enqueue
//! order, and a record whose head operation is backing off holds its whole
//! queue back with it.

use std::collections::HashMap;

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{Operation, OperationId, OperationStatus, Priority};

/// Outbox occupancy, surfaced to callers continuously
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub failed: usize,
    pub total: usize,
}

/// Trait for outbox storage operations
pub trait OutboxRepository {
    /// Append a pending operation
    async fn enqueue(&self, op: &Operation) -> Result<()>;

    /// Select the next submittable batch (priority-aware, per-record FIFO)
    async fn next_batch(&self, limit: usize, now: i64) -> Result<Vec<Operation>>;

    /// Remove confirmed operations
    async fn remove(&self, ids: &[OperationId]) -> Result<usize>;

    /// Record a retryable failure and push the operation's next attempt out
    async fn schedule_retry(&self, id: &OperationId, error: &str, retry_at: i64) -> Result<()>;

    /// Mark an operation permanently failed
    async fn mark_failed(&self, id: &OperationId, error: &str) -> Result<()>;

    /// Park an operation awaiting conflict resolution
    async fn mark_conflicted(&self, id: &OperationId) -> Result<()>;

    /// Submission attempts recorded so far
    async fn attempts(&self, id: &OperationId) -> Result<u32>;

    /// Occupancy counts
    async fn counts(&self) -> Result<OutboxCounts>;

    /// List permanently failed operations, newest first
    async fn list_failed(&self, limit: usize) -> Result<Vec<Operation>>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &libsql::Row) -> Result<Operation> {
        let id: String = row.get(0)?;
        let tbl: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let status: String = row.get(6)?;
        let data: String = row.get(4)?;

        Ok(Operation {
            id: id.parse().map_err(|_| bad_row("operation id"))?,
            table: tbl.parse().map_err(|_| bad_row("table"))?,
            kind: kind.parse().map_err(|_| bad_row("kind"))?,
            record_id: row.get(3)?,
            data: serde_json::from_str(&data)?,
            priority: Priority::from_i64(row.get(5)?),
            status: status.parse().map_err(|_| bad_row("status"))?,
            client_timestamp: row.get(7)?,
            attempts: u32::try_from(row.get::<i64>(8)?).unwrap_or(u32::MAX),
            next_attempt_at: row.get(9)?,
            last_error: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    async fn collect(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<Operation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut ops = Vec::new();
        while let Some(row) = rows.next().await? {
            ops.push(Self::parse_operation(&row)?);
        }
        Ok(ops)
    }
}

const SELECT_COLUMNS: &str = "id, tbl, kind, record_id, data, priority, status, \
     client_timestamp, attempts, next_attempt_at, last_error, created_at";

fn bad_row(field: &str) -> Error {
    Error::Database(format!("corrupt outbox row: invalid {field}"))
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn enqueue(&self, op: &Operation) -> Result<()> {
        if op.record_id.trim().is_empty() {
            return Err(Error::InvalidInput("record id cannot be empty".into()));
        }

        self.conn
            .execute(
                "INSERT INTO outbox (id, tbl, kind, record_id, data, priority, status,
                     client_timestamp, attempts, next_attempt_at, last_error, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    op.id.as_str(),
                    op.table.as_str(),
                    op.kind.as_str(),
                    op.record_id.as_str(),
                    op.data.to_string(),
                    op.priority.as_i64(),
                    op.status.as_str(),
                    op.client_timestamp,
                    i64::from(op.attempts),
                    op.next_attempt_at,
                    op.last_error.as_deref(),
                    op.created_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn next_batch(&self, limit: usize, now: i64) -> Result<Vec<Operation>> {
        // Backing-off heads are filtered in plan_batch, not in SQL: a record
        // whose first pending operation is waiting must not let a later
        // operation on the same record jump the queue.
        let pending = self
            .collect(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM outbox
                     WHERE status = 'pending'
                     ORDER BY seq ASC"
                ),
                (),
            )
            .await?;

        Ok(plan_batch(pending, limit, now))
    }

    async fn remove(&self, ids: &[OperationId]) -> Result<usize> {
        let mut removed = 0_usize;
        for id in ids {
            removed += usize::try_from(
                self.conn
                    .execute("DELETE FROM outbox WHERE id = ?", params![id.as_str()])
                    .await?,
            )
            .unwrap_or(0);
        }
        Ok(removed)
    }

    async fn schedule_retry(&self, id: &OperationId, error: &str, retry_at: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE outbox
                 SET attempts = attempts + 1, next_attempt_at = ?, last_error = ?
                 WHERE id = ? AND status = 'pending'",
                params![retry_at, error, id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &OperationId, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE outbox
                 SET status = ?, attempts = attempts + 1, last_error = ?
                 WHERE id = ?",
                params![OperationStatus::Failed.as_str(), error, id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn mark_conflicted(&self, id: &OperationId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE outbox SET status = ? WHERE id = ?",
                params![OperationStatus::Conflicted.as_str(), id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn attempts(&self, id: &OperationId) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "SELECT attempts FROM outbox WHERE id = ?",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(u32::try_from(row.get::<i64>(0)?).unwrap_or(u32::MAX)),
            None => Err(Error::Database(format!("operation not in outbox: {id}"))),
        }
    }

    async fn counts(&self) -> Result<OutboxCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                     COUNT(CASE WHEN status = 'pending' THEN 1 END),
                     COUNT(CASE WHEN status = 'failed' THEN 1 END),
                     COUNT(*)
                 FROM outbox",
                (),
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("count query returned no rows".into()))?;

        Ok(OutboxCounts {
            pending: usize::try_from(row.get::<i64>(0)?).unwrap_or(0),
            failed: usize::try_from(row.get::<i64>(1)?).unwrap_or(0),
            total: usize::try_from(row.get::<i64>(2)?).unwrap_or(0),
        })
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<Operation>> {
        self.collect(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM outbox
                 WHERE status = 'failed'
                 ORDER BY seq DESC
                 LIMIT ?"
            ),
            params![i64::try_from(limit).unwrap_or(i64::MAX)],
        )
        .await
    }
}

/// Build a submittable batch from pending operations in arrival order.
///
/// Operations are grouped per (table, record). Groups dequeue by their head
/// operation's priority, ties broken by arrival. Within a group the enqueue
/// order is preserved, and a group whose head is still backing off is
/// skipped entirely.
fn plan_batch(pending: Vec<Operation>, limit: usize, now: i64) -> Vec<Operation> {
    let mut groups: Vec<Vec<Operation>> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

    for op in pending {
        let key = (op.table.as_str(), op.record_id.clone());
        if let Some(&at) = index.get(&key) {
            groups[at].push(op);
        } else {
            index.insert(key, groups.len());
            groups.push(vec![op]);
        }
    }

    // Stable sort keeps arrival order between equal-priority records.
    groups.sort_by(|a, b| b[0].priority.cmp(&a[0].priority));

    let mut batch = Vec::with_capacity(limit.min(index.len()));
    for group in groups {
        if batch.len() >= limit {
            break;
        }
        if group[0].next_attempt_at > now {
            continue;
        }
        for op in group {
            if batch.len() >= limit || op.next_attempt_at > now {
                break;
            }
            batch.push(op);
        }
    }
    batch
}
