//! Sync orchestrator
//!
//! Drives complete sync cycles: drain the outbox in batches, exchange with
//! the server, fold the response back into local state, advance the cursor.
//! At most one cycle runs at a time; triggers arriving mid-cycle coalesce
//! into a single follow-up run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::SyncSettings;
use crate::error::Result;
use crate::protocol::{SyncRequest, SyncResponse};
use crate::services::ClientStore;

use super::events::{CycleSummary, SyncEvent};
use super::transport::SyncTransport;

/// How a `run_cycle` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran to completion
    Completed(CycleSummary),
    /// Another cycle was already in flight; a follow-up run was requested
    Coalesced,
}

/// Single-flight sync driver over a [`ClientStore`] and a transport
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: ClientStore,
    transport: Arc<dyn SyncTransport>,
    settings: SyncSettings,
    inflight: Arc<Mutex<()>>,
    rerun: Arc<AtomicBool>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    /// Create an orchestrator over the given store and transport
    #[must_use]
    pub fn new(
        store: ClientStore,
        transport: Arc<dyn SyncTransport>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            transport,
            settings,
            inflight: Arc::new(Mutex::new(())),
            rerun: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Subscribe to sync lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one sync cycle, or coalesce if a cycle is already in flight.
    ///
    /// A trigger that arrives mid-cycle does not stack: it flips a flag and
    /// the in-flight caller runs one follow-up cycle before releasing.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(_guard) = self.inflight.try_lock() else {
            self.rerun.store(true, Ordering::SeqCst);
            tracing::debug!("Sync already in flight, coalescing trigger");
            return Ok(CycleOutcome::Coalesced);
        };

        let mut summary = self.cycle_once().await?;
        while self.rerun.swap(false, Ordering::SeqCst) {
            summary = self.cycle_once().await?;
        }
        Ok(CycleOutcome::Completed(summary))
    }

    /// Trigger a cycle without waiting for it
    pub fn spawn_cycle(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_cycle().await {
                tracing::warn!("Background sync cycle failed: {e}");
            }
        });
    }

    async fn cycle_once(&self) -> Result<CycleSummary> {
        let _ = self.events.send(SyncEvent::CycleStarted);

        match self.drive_cycle().await {
            Ok(summary) => {
                let _ = self.events.send(SyncEvent::CycleCompleted(summary));
                tracing::info!(
                    applied = summary.applied,
                    failed = summary.failed,
                    conflicts = summary.conflicts,
                    pulled = summary.server_changes,
                    "Sync cycle completed"
                );
                Ok(summary)
            }
            Err(e) => {
                let message = e.to_string();
                self.store.record_sync_error(&message).await.ok();
                let _ = self.events.send(SyncEvent::CycleFailed(message));
                Err(e)
            }
        }
    }

    /// One full cycle: repeated exchanges until the outbox stops yielding
    /// full batches. Runs at least one exchange even with an empty outbox,
    /// so pull-only devices still receive changes.
    async fn drive_cycle(&self) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        let mut exchanged = false;

        loop {
            let cursor = self.store.cursor().await?;
            let now = chrono::Utc::now().timestamp_millis();
            let batch = self.store.next_batch(self.settings.batch_size, now).await?;
            let batch_len = batch.len();

            // A full previous batch warrants another look, but an empty
            // follow-up batch means the outbox is drained.
            if batch.is_empty() && exchanged {
                return Ok(summary);
            }

            let request = SyncRequest {
                last_sync_timestamp: cursor.last_sync_timestamp,
                device_id: cursor.device_id,
                operations: batch.iter().map(Into::into).collect(),
            };

            let response = self.exchange_with_retry(&request).await?;
            exchanged = true;
            self.apply_response(&response, &mut summary).await?;

            if batch_len < self.settings.batch_size {
                return Ok(summary);
            }
        }
    }

    /// Exchange with in-cycle retries for retryable failures.
    ///
    /// The protocol is replay-safe, so resubmitting the same request after
    /// a transport failure is always correct.
    async fn exchange_with_retry(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let mut attempt: u32 = 0;
        loop {
            match self.transport.exchange(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && self.settings.retry.allows_retry(attempt + 1) => {
                    let delay = self.settings.retry.delay_for(attempt);
                    tracing::warn!(attempt, delay_ms = delay, "Sync exchange failed, retrying: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_response(
        &self,
        response: &SyncResponse,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        self.store
            .remove_operations(&response.applied_operations)
            .await?;
        summary.applied += response.applied_operations.len();

        for failure in &response.failed_operations {
            if failure.retryable {
                let attempts = self.store.attempts(&failure.id).await.unwrap_or(u32::MAX);
                if self.settings.retry.allows_retry(attempts) {
                    let retry_at = chrono::Utc::now().timestamp_millis()
                        + i64::try_from(self.settings.retry.delay_for(attempts)).unwrap_or(0);
                    self.store
                        .schedule_retry(&failure.id, &failure.error, retry_at)
                        .await?;
                    continue;
                }
            }
            tracing::warn!(operation_id = %failure.id, "Operation permanently failed: {}", failure.error);
            self.store.mark_failed(&failure.id, &failure.error).await?;
            summary.failed += 1;
        }

        for conflict in &response.conflicts {
            self.store.save_conflict(conflict).await?;
            self.store.mark_conflicted(&conflict.operation_id).await?;
            summary.conflicts += 1;
        }

        for change in &response.server_changes {
            self.store.apply_server_change(change).await?;
            summary.server_changes += 1;
        }

        // Cursor advances last: everything above already landed locally, so
        // a crash in between replays rather than loses.
        self.store.advance_cursor(response.server_timestamp).await?;
        summary.server_timestamp = response.server_timestamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{
        Conflict, ConflictType, Operation, OperationKind, OperationStatus, Priority, SyncTable,
    };
    use crate::protocol::{FailedOperation, ServerChange};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted transport: pops one canned reply per exchange
    struct ScriptedTransport {
        replies: std::sync::Mutex<VecDeque<Result<SyncResponse>>>,
        seen: std::sync::Mutex<Vec<SyncRequest>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<SyncResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(replies.into()),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SyncTransport for ScriptedTransport {
        async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transport("script exhausted".into())))
        }
    }

    fn empty_response(server_timestamp: i64) -> SyncResponse {
        SyncResponse {
            applied_operations: vec![],
            failed_operations: vec![],
            conflicts: vec![],
            server_changes: vec![],
            server_timestamp,
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            retry: crate::sync::RetryPolicy {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                factor: 1.0,
                max_attempts: 3,
            },
            ..SyncSettings::default()
        }
    }

    fn op(record_id: &str) -> Operation {
        Operation::new(
            OperationKind::Create,
            SyncTable::Accounts,
            record_id,
            json!({"id": record_id, "name": "Checking"}),
            Priority::Normal,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applied_operations_leave_the_outbox_and_cursor_advances() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let operation = op("acct-1");
        store.enqueue(&operation).await.unwrap();

        let mut response = empty_response(1_000);
        response.applied_operations.push(operation.id);
        let transport = ScriptedTransport::new(vec![Ok(response)]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        let outcome = orchestrator.run_cycle().await.unwrap();

        let CycleOutcome::Completed(summary) = outcome else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.server_timestamp, 1_000);

        assert_eq!(store.outbox_counts().await.unwrap().total, 0);
        assert_eq!(store.cursor().await.unwrap().last_sync_timestamp, Some(1_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_outbox_still_pulls_server_changes() {
        let store = ClientStore::open_in_memory().await.unwrap();

        let mut response = empty_response(2_000);
        response.server_changes.push(ServerChange {
            table: SyncTable::Goals,
            kind: OperationKind::Create,
            data: json!({"id": "goal-1", "target": 1000}),
            server_timestamp: 1_500,
        });
        let transport = ScriptedTransport::new(vec![Ok(response)]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        orchestrator.run_cycle().await.unwrap();

        let cached = store.get_record(SyncTable::Goals, "goal-1").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflicts_are_recorded_and_the_operation_parked() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let operation = op("acct-1");
        store.enqueue(&operation).await.unwrap();

        let mut response = empty_response(3_000);
        response.conflicts.push(Conflict {
            operation_id: operation.id,
            table: SyncTable::Accounts,
            conflict_type: ConflictType::CreateConflict,
            client_data: operation.data.clone(),
            server_data: json!({"id": "acct-1", "name": "Existing"}),
            client_timestamp: operation.client_timestamp,
            server_timestamp: 2_500,
        });
        let transport = ScriptedTransport::new(vec![Ok(response)]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        let CycleOutcome::Completed(summary) = orchestrator.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.conflicts, 1);

        assert!(store.get_conflict(&operation.id).await.unwrap().is_some());
        // Parked: still stored, but never batched again.
        assert_eq!(store.outbox_counts().await.unwrap().pending, 0);
        assert_eq!(store.outbox_counts().await.unwrap().total, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retryable_rejection_schedules_a_retry() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let operation = op("acct-1");
        store.enqueue(&operation).await.unwrap();

        let mut response = empty_response(4_000);
        response.failed_operations.push(FailedOperation {
            id: operation.id,
            error: "storage briefly unavailable".into(),
            retryable: true,
        });
        let transport = ScriptedTransport::new(vec![Ok(response)]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        let CycleOutcome::Completed(summary) = orchestrator.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.failed, 0);

        assert_eq!(store.attempts(&operation.id).await.unwrap(), 1);
        assert_eq!(store.outbox_counts().await.unwrap().pending, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_retryable_rejection_is_permanent() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let operation = op("acct-1");
        store.enqueue(&operation).await.unwrap();

        let mut response = empty_response(5_000);
        response.failed_operations.push(FailedOperation {
            id: operation.id,
            error: "unknown syncable table: budgets".into(),
            retryable: false,
        });
        let transport = ScriptedTransport::new(vec![Ok(response)]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        orchestrator.run_cycle().await.unwrap();

        let failed = store.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, OperationStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_failures_retry_in_cycle_then_succeed() {
        let store = ClientStore::open_in_memory().await.unwrap();

        let transport = ScriptedTransport::new(vec![
            Err(Error::Transport("connection refused".into())),
            Err(Error::Transport("connection refused".into())),
            Ok(empty_response(6_000)),
        ]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport.clone(), settings());
        orchestrator.run_cycle().await.unwrap();

        assert_eq!(transport.seen.lock().unwrap().len(), 3);
        assert_eq!(store.cursor().await.unwrap().last_sync_timestamp, Some(6_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_transport_retries_record_the_error() {
        let store = ClientStore::open_in_memory().await.unwrap();

        let transport = ScriptedTransport::new(vec![
            Err(Error::Transport("connection refused".into())),
            Err(Error::Transport("connection refused".into())),
            Err(Error::Transport("connection refused".into())),
        ]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport, settings());
        let result = orchestrator.run_cycle().await;
        assert!(result.is_err());

        let cursor = store.cursor().await.unwrap();
        assert!(cursor.last_error.is_some());
        assert!(cursor.last_sync_timestamp.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_retryable_api_error_fails_fast() {
        let store = ClientStore::open_in_memory().await.unwrap();

        let transport = ScriptedTransport::new(vec![Err(Error::Api {
            status: 401,
            message: "invalid token".into(),
        })]);

        let orchestrator = SyncOrchestrator::new(store.clone(), transport.clone(), settings());
        assert!(orchestrator.run_cycle().await.is_err());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_batches_drain_in_multiple_exchanges() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let first = op("acct-1");
        let second = op("acct-2");
        store.enqueue(&first).await.unwrap();
        store.enqueue(&second).await.unwrap();

        let mut reply_one = empty_response(100);
        reply_one.applied_operations.push(first.id);
        let mut reply_two = empty_response(200);
        reply_two.applied_operations.push(second.id);
        let transport = ScriptedTransport::new(vec![Ok(reply_one), Ok(reply_two)]);

        let mut small = settings();
        small.batch_size = 1;
        let orchestrator = SyncOrchestrator::new(store.clone(), transport.clone(), small);
        let CycleOutcome::Completed(summary) = orchestrator.run_cycle().await.unwrap() else {
            panic!("expected a completed cycle");
        };

        assert_eq!(summary.applied, 2);
        // Second exchange carried the advanced cursor from the first.
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[1].last_sync_timestamp, Some(100));
        assert_eq!(store.outbox_counts().await.unwrap().total, 0);
    }

    /// Transport that parks each exchange until a permit is released
    struct GatedTransport {
        gate: tokio::sync::Semaphore,
        entered: std::sync::atomic::AtomicUsize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SyncTransport for GatedTransport {
        async fn exchange(&self, _request: &SyncRequest) -> Result<SyncResponse> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(empty_response(1_000 + i64::try_from(call).unwrap()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn triggers_during_a_cycle_coalesce_into_one_follow_up() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let transport = Arc::new(GatedTransport {
            gate: tokio::sync::Semaphore::new(0),
            entered: std::sync::atomic::AtomicUsize::new(0),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });

        let orchestrator = SyncOrchestrator::new(store, transport.clone(), settings());
        let background = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_cycle().await })
        };

        // Wait for the first exchange to park inside the transport.
        while transport.entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        // Both mid-cycle triggers coalesce; neither starts its own cycle.
        assert_eq!(orchestrator.run_cycle().await.unwrap(), CycleOutcome::Coalesced);
        assert_eq!(orchestrator.run_cycle().await.unwrap(), CycleOutcome::Coalesced);

        transport.gate.add_permits(2);
        let outcome = background.await.unwrap().unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));

        // The initial exchange plus exactly one coalesced follow-up.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_are_broadcast_for_each_cycle() {
        let store = ClientStore::open_in_memory().await.unwrap();
        let transport = ScriptedTransport::new(vec![Ok(empty_response(100))]);

        let orchestrator = SyncOrchestrator::new(store, transport, settings());
        let mut events = orchestrator.subscribe();
        orchestrator.run_cycle().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SyncEvent::CycleStarted);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::CycleCompleted(_)
        ));
    }
}
