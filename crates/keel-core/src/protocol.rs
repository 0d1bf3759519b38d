//! Wire types for the sync exchange
//!
//! One sync cycle is a single request/response pair: the client pushes its
//! pending operations together with its cursor, and the server answers with
//! per-operation outcomes plus every record other devices changed since that
//! cursor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Conflict, Operation, OperationId, OperationKind, SyncTable};

/// One operation as submitted over the wire.
///
/// `table` stays a raw string here on purpose: an unknown table must be
/// rejected per-operation by the server, not fail deserialization of the
/// whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOperation {
    pub id: OperationId,
    pub table: String,
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    pub data: Value,
    pub client_timestamp: i64,
}

impl From<&Operation> for PushOperation {
    fn from(op: &Operation) -> Self {
        Self {
            id: op.id,
            table: op.table.as_str().to_string(),
            kind: op.kind,
            data: op.data.clone(),
            client_timestamp: op.client_timestamp,
        }
    }
}

/// The client half of one sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// The caller's cursor; absent on first sync (pulls the entire dataset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<i64>,
    pub device_id: String,
    pub operations: Vec<PushOperation>,
}

/// A per-operation rejection reported in the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub id: OperationId,
    pub error: String,
    /// Whether the client may resubmit after backoff. Validation and
    /// authorization rejections are final; infrastructure hiccups are not.
    pub retryable: bool,
}

/// A record mutated by any device since the caller's cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerChange {
    pub table: SyncTable,
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    /// Full record payload, including its `id` field
    pub data: Value,
    pub server_timestamp: i64,
}

impl ServerChange {
    /// The target record's id, read from the payload.
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

/// The server half of one sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub applied_operations: Vec<OperationId>,
    pub failed_operations: Vec<FailedOperation>,
    pub conflicts: Vec<Conflict>,
    pub server_changes: Vec<ServerChange>,
    /// Server-assigned time for this exchange; becomes the caller's new
    /// cursor. Never computed on the client.
    pub server_timestamp: i64,
}

/// Per-device sync status, as served by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub last_sync_timestamp: Option<i64>,
    pub sync_in_progress: bool,
    pub last_error: Option<String>,
}
