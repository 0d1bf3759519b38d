//! Client sync engine: orchestrator, transport, backoff, and resolution

mod backoff;
mod events;
mod orchestrator;
mod resolver;
mod transport;

pub use backoff::RetryPolicy;
pub use events::{CycleSummary, SyncEvent};
pub use orchestrator::{CycleOutcome, SyncOrchestrator};
pub use resolver::{resolve_conflict, ConflictChoice, Resolution};
pub use transport::{HttpSyncTransport, SyncTransport};
