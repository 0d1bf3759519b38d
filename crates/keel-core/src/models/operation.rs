//! Outbox operation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::SyncTable;

/// A unique identifier for an operation, using UUID v7 (time-sortable)
///
/// Generated on the client and echoed back by the server, so replays of the
/// same mutation are recognizable end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a mutation does to its target record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Lifecycle state of an outbox operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Applied,
    Conflicted,
    Failed,
}

impl OperationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Conflicted => "conflicted",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "conflicted" => Ok(Self::Conflicted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// Dequeue priority. Reorders unrelated records only; two operations on the
/// same record always leave the outbox in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        match value {
            0 => Self::Low,
            2 => Self::High,
            3 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// A client-originated mutation intent, queued until the server confirms it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, the idempotent replay key
    pub id: OperationId,
    /// Target entity kind
    pub table: SyncTable,
    /// Mutation kind
    pub kind: OperationKind,
    /// Id of the record the mutation targets
    pub record_id: String,
    /// Opaque record payload, validated by the target entity on the server
    pub data: Value,
    /// Base-state time (unix ms) the mutation was computed against
    pub client_timestamp: i64,
    /// Lifecycle state
    pub status: OperationStatus,
    /// Dequeue priority
    pub priority: Priority,
    /// Submission attempts so far
    pub attempts: u32,
    /// Earliest time (unix ms) the operation may be submitted again
    pub next_attempt_at: i64,
    /// Last submission error, if any
    pub last_error: Option<String>,
    /// Enqueue timestamp (unix ms)
    pub created_at: i64,
}

impl Operation {
    /// Create a new pending operation against the current local state.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        table: SyncTable,
        record_id: impl Into<String>,
        data: Value,
        priority: Priority,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: OperationId::new(),
            table,
            kind,
            record_id: record_id.into(),
            data,
            client_timestamp: now,
            status: OperationStatus::Pending,
            priority,
            attempts: 0,
            next_attempt_at: 0,
            last_error: None,
            created_at: now,
        }
    }
}
