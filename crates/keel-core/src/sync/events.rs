//! Sync lifecycle events
//!
//! Broadcast to interested subscribers (UI, CLI progress output). Slow or
//! absent subscribers never block a cycle.

use serde::Serialize;

/// What one completed cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub applied: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub server_changes: usize,
    /// The cursor value after the cycle
    pub server_timestamp: i64,
}

/// Lifecycle notification emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncEvent {
    CycleStarted,
    CycleCompleted(CycleSummary),
    CycleFailed(String),
}
