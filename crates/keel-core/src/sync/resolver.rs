//! Conflict resolution
//!
//! A resolution never mutates the refused operation. It discards it and,
//! unless the server's state was accepted as-is, enqueues a brand-new
//! operation with a fresh id and a fresh base timestamp, subject to the
//! same conflict detection as any other mutation.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictType, Operation, OperationId, OperationKind, Priority};
use crate::protocol::ServerChange;
use crate::services::ClientStore;

/// Which side of a conflict the user kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Reassert the client's payload over the server's current state
    Client,
    /// Accept the server's state and drop the local mutation
    Server,
    /// Submit a caller-merged payload
    Merge,
}

/// What resolving a conflict did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The local mutation was dropped; server state stands
    Discarded,
    /// A replacement operation was enqueued
    Reenqueued(OperationId),
}

/// Resolve one recorded conflict.
///
/// `merged` is required for [`ConflictChoice::Merge`] and ignored otherwise.
pub async fn resolve_conflict(
    store: &ClientStore,
    operation_id: &OperationId,
    choice: ConflictChoice,
    merged: Option<Value>,
) -> Result<Resolution> {
    let conflict = store
        .get_conflict(operation_id)
        .await?
        .ok_or_else(|| Error::ConflictNotFound(operation_id.to_string()))?;

    // The refused operation is done either way.
    store.remove_operations(&[*operation_id]).await?;
    store.delete_conflict(operation_id).await?;

    match choice {
        ConflictChoice::Server => {
            accept_server_state(store, &conflict).await?;
            tracing::info!(%operation_id, "Conflict resolved by accepting server state");
            Ok(Resolution::Discarded)
        }
        ConflictChoice::Client => {
            let replacement = replacement_operation(&conflict, conflict.client_data.clone())?;
            let id = replacement.id;
            store.enqueue(&replacement).await?;
            tracing::info!(%operation_id, replacement = %id, "Conflict resolved by keeping client data");
            Ok(Resolution::Reenqueued(id))
        }
        ConflictChoice::Merge => {
            let merged = merged
                .ok_or_else(|| Error::InvalidInput("merge resolution requires a payload".into()))?;
            let replacement = replacement_operation(&conflict, merged)?;
            let id = replacement.id;
            store.enqueue(&replacement).await?;
            tracing::info!(%operation_id, replacement = %id, "Conflict resolved with merged data");
            Ok(Resolution::Reenqueued(id))
        }
    }
}

/// Fold the conflict's server snapshot into the local cache so the device
/// converges immediately instead of waiting for the next pull.
async fn accept_server_state(store: &ClientStore, conflict: &Conflict) -> Result<()> {
    if conflict.server_data.is_null() {
        // Base record is gone on the server; nothing to fold in.
        return Ok(());
    }
    store
        .apply_server_change(&ServerChange {
            table: conflict.table,
            kind: OperationKind::Update,
            data: conflict.server_data.clone(),
            server_timestamp: conflict.server_timestamp,
        })
        .await
}

/// Build the replacement operation for a client or merge resolution.
///
/// The replacement targets the record's current server state: a refused
/// create becomes an update (the record exists), a refused update stays an
/// update unless the base record was deleted (then it recreates), and a
/// refused delete is reasserted as a delete.
fn replacement_operation(conflict: &Conflict, data: Value) -> Result<Operation> {
    let kind = match conflict.conflict_type {
        ConflictType::CreateConflict => OperationKind::Update,
        ConflictType::UpdateConflict => {
            if conflict.server_data.is_null() {
                OperationKind::Create
            } else {
                OperationKind::Update
            }
        }
        ConflictType::DeleteConflict => OperationKind::Delete,
    };

    let record_id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("resolution payload has no record id".into()))?
        .to_string();

    let mut op = Operation::new(kind, conflict.table, record_id, data, Priority::High);
    // The user resolved against the server state at server_timestamp, so the
    // replacement's base must be at least that even if the local clock lags
    // the server-assigned time.
    op.client_timestamp = op.client_timestamp.max(conflict.server_timestamp);
    Ok(op)
}
