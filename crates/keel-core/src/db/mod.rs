//! Local database layer: connection, migrations, and repositories

mod connection;
mod conflict_repository;
mod cursor_repository;
mod migrations;
mod outbox_repository;
mod record_cache;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use cursor_repository::{CursorRepository, LibSqlCursorRepository, SyncCursor};
pub use outbox_repository::{LibSqlOutboxRepository, OutboxCounts, OutboxRepository};
pub use record_cache::{CachedRecord, LibSqlRecordCache, RecordCache};
