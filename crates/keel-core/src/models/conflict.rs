//! Sync conflict model

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OperationId, SyncTable};

/// How a proposed mutation diverged from the server's authoritative state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    CreateConflict,
    UpdateConflict,
    DeleteConflict,
}

impl ConflictType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateConflict => "create_conflict",
            Self::UpdateConflict => "update_conflict",
            Self::DeleteConflict => "delete_conflict",
        }
    }
}

impl FromStr for ConflictType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_conflict" => Ok(Self::CreateConflict),
            "update_conflict" => Ok(Self::UpdateConflict),
            "delete_conflict" => Ok(Self::DeleteConflict),
            other => Err(format!("unknown conflict type: {other}")),
        }
    }
}

/// A detected divergence between a proposed mutation and the server's
/// current record state. Not an error: a protocol outcome that requires
/// explicit resolution before the mutation can ever re-apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The operation that was refused
    pub operation_id: OperationId,
    /// Target entity kind
    pub table: SyncTable,
    /// Divergence classification
    pub conflict_type: ConflictType,
    /// The payload the client proposed
    pub client_data: Value,
    /// The server's authoritative record at detection time (null when the
    /// base record no longer exists)
    pub server_data: Value,
    /// Base-state time the client declared (unix ms)
    pub client_timestamp: i64,
    /// The record's true last-modified time on the server (unix ms)
    pub server_timestamp: i64,
}
