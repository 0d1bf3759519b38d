//! Sync request processor
//!
//! Applies one device's pushed batch against authoritative state and
//! computes the pull half of the exchange. All mutations for a request
//! happen inside a single transaction: a request either lands fully or
//! not at all, and every response timestamp comes from the server clock.

use keel_core::models::{Conflict, ConflictType, OperationKind, SyncTable};
use keel_core::protocol::{
    FailedOperation, PushOperation, ServerChange, SyncRequest, SyncResponse,
};
use libsql::Connection;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::rate_limit::user_fingerprint;
use crate::sessions::SessionRepository;
use crate::store::{OperationLedger, RecordRepository, ServerRecord, ServerStore};

/// Server-side half of the sync protocol
#[derive(Clone)]
pub struct SyncProcessor {
    store: ServerStore,
    max_operations: usize,
}

enum Outcome {
    Applied,
    Failed(FailedOperation),
    Conflicted(Conflict),
}

impl SyncProcessor {
    pub const fn new(store: ServerStore, max_operations: usize) -> Self {
        Self {
            store,
            max_operations,
        }
    }

    /// Process one sync exchange for an authenticated user.
    pub async fn process(
        &self,
        user: &AuthenticatedUser,
        request: &SyncRequest,
    ) -> Result<SyncResponse, AppError> {
        if request.device_id.trim().is_empty() {
            return Err(AppError::bad_request("device_id cannot be empty"));
        }
        if request.operations.len() > self.max_operations {
            return Err(AppError::bad_request(format!(
                "batch exceeds {} operations",
                self.max_operations
            )));
        }

        let db = self.store.lock().await;
        let conn = db.connection();

        let now = chrono::Utc::now().timestamp_millis();
        let sessions = SessionRepository::new(conn);

        // The assigned timestamp must outrun every cursor already issued to
        // any of this user's devices, not just the caller's. A change
        // stamped at or below an issued cursor would sit forever behind
        // that device's strict `updated_at > cursor` pull.
        let cursor_floor = sessions
            .max_cursor(&user.user_id)
            .await?
            .map_or(0, |t| t + 1);
        let server_timestamp = now.max(cursor_floor);

        sessions
            .begin(&user.user_id, &request.device_id, now)
            .await?;

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        match self
            .run_exchange(conn, user, request, server_timestamp)
            .await
        {
            Ok(response) => {
                conn.execute("COMMIT", ()).await?;
                Ok(response)
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                sessions
                    .fail(&user.user_id, &request.device_id, &e.to_string(), now)
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn run_exchange(
        &self,
        conn: &Connection,
        user: &AuthenticatedUser,
        request: &SyncRequest,
        server_timestamp: i64,
    ) -> Result<SyncResponse, AppError> {
        let mut applied_operations = Vec::new();
        let mut failed_operations = Vec::new();
        let mut conflicts = Vec::new();

        for op in &request.operations {
            match apply_operation(conn, &user.user_id, op, server_timestamp).await? {
                Outcome::Applied => applied_operations.push(op.id),
                Outcome::Failed(failure) => failed_operations.push(failure),
                Outcome::Conflicted(conflict) => conflicts.push(conflict),
            }
        }

        // Pull half: everything this user's records changed since the
        // caller's cursor, including what this request just applied. The
        // client cache folds its own writes back in idempotently.
        let records = RecordRepository::new(conn);
        let server_changes = records
            .changes_since(&user.user_id, request.last_sync_timestamp)
            .await?
            .into_iter()
            .map(to_server_change)
            .collect();

        SessionRepository::new(conn)
            .complete(&user.user_id, &request.device_id, server_timestamp)
            .await?;

        tracing::info!(
            user = user_fingerprint(&user.user_id),
            device_id = %request.device_id,
            pushed = request.operations.len(),
            applied = applied_operations.len(),
            failed = failed_operations.len(),
            conflicts = conflicts.len(),
            "Processed sync exchange"
        );

        Ok(SyncResponse {
            applied_operations,
            failed_operations,
            conflicts,
            server_changes,
            server_timestamp,
        })
    }
}

async fn apply_operation(
    conn: &Connection,
    user_id: &str,
    op: &PushOperation,
    server_timestamp: i64,
) -> Result<Outcome, AppError> {
    let Ok(table) = op.table.parse::<SyncTable>() else {
        return Ok(reject(op, format!("unknown syncable table: {}", op.table)));
    };

    let Some(record_id) = op.data.get("id").and_then(serde_json::Value::as_str) else {
        return Ok(reject(op, "operation payload has no record id".to_string()));
    };

    // A payload naming another owner is never applied and never silently
    // reassigned to the caller.
    if let Some(owner) = op.data.get("user_id").and_then(serde_json::Value::as_str) {
        if owner != user_id {
            tracing::warn!(
                user = user_fingerprint(user_id),
                payload_owner = user_fingerprint(owner),
                table = table.as_str(),
                "Rejected operation whose payload names another owner"
            );
            return Ok(reject(op, "payload owner does not match caller".to_string()));
        }
    }

    let ledger = OperationLedger::new(conn);
    if ledger.is_applied(&op.id).await? {
        // Replay of a confirmed operation; acknowledge without re-applying.
        return Ok(Outcome::Applied);
    }

    let records = RecordRepository::new(conn);
    let existing = records.get(table, record_id).await?;

    if let Some(record) = &existing {
        if record.user_id != user_id {
            tracing::warn!(
                user = user_fingerprint(user_id),
                table = table.as_str(),
                "Rejected operation against another user's record"
            );
            return Ok(reject(op, "record does not belong to caller".to_string()));
        }
    }

    let outcome = match op.kind {
        OperationKind::Create => match existing {
            Some(record) if !record.is_deleted => Outcome::Conflicted(Conflict {
                operation_id: op.id,
                table,
                conflict_type: ConflictType::CreateConflict,
                client_data: op.data.clone(),
                server_data: record.data,
                client_timestamp: op.client_timestamp,
                server_timestamp: record.updated_at,
            }),
            // New record, or recreation over a tombstone.
            _ => {
                records
                    .upsert(&ServerRecord {
                        table,
                        id: record_id.to_string(),
                        user_id: user_id.to_string(),
                        data: op.data.clone(),
                        updated_at: server_timestamp,
                        is_deleted: false,
                    })
                    .await?;
                Outcome::Applied
            }
        },
        OperationKind::Update => match existing {
            Some(record) if !record.is_deleted => {
                if op.client_timestamp >= record.updated_at {
                    records
                        .upsert(&ServerRecord {
                            table,
                            id: record_id.to_string(),
                            user_id: user_id.to_string(),
                            data: op.data.clone(),
                            updated_at: server_timestamp,
                            is_deleted: false,
                        })
                        .await?;
                    Outcome::Applied
                } else {
                    // The record moved on after the client's base state.
                    Outcome::Conflicted(Conflict {
                        operation_id: op.id,
                        table,
                        conflict_type: ConflictType::UpdateConflict,
                        client_data: op.data.clone(),
                        server_data: record.data,
                        client_timestamp: op.client_timestamp,
                        server_timestamp: record.updated_at,
                    })
                }
            }
            // Updating a record that is gone; server_data is null so the
            // resolver knows the base no longer exists.
            other => Outcome::Conflicted(Conflict {
                operation_id: op.id,
                table,
                conflict_type: ConflictType::UpdateConflict,
                client_data: op.data.clone(),
                server_data: serde_json::Value::Null,
                client_timestamp: op.client_timestamp,
                server_timestamp: other.map_or(0, |r| r.updated_at),
            }),
        },
        // Deletes carry no freshness check: a present record is removed,
        // and deleting something already gone is a success, not an error.
        OperationKind::Delete => match existing {
            Some(record) if !record.is_deleted => {
                records
                    .soft_delete(table, record_id, server_timestamp)
                    .await?;
                Outcome::Applied
            }
            _ => Outcome::Applied,
        },
    };

    if matches!(outcome, Outcome::Applied) {
        ledger
            .record_applied(&op.id, user_id, server_timestamp)
            .await?;
    }
    Ok(outcome)
}

fn reject(op: &PushOperation, error: String) -> Outcome {
    Outcome::Failed(FailedOperation {
        id: op.id,
        error,
        retryable: false,
    })
}

fn to_server_change(record: ServerRecord) -> ServerChange {
    ServerChange {
        table: record.table,
        kind: if record.is_deleted {
            OperationKind::Delete
        } else {
            OperationKind::Update
        },
        data: record.data,
        server_timestamp: record.updated_at,
    }
}
