//! Data models shared by the client engine and the sync protocol

mod conflict;
mod operation;
mod table;

pub use conflict::{Conflict, ConflictType};
pub use operation::{Operation, OperationId, OperationKind, OperationStatus, Priority};
pub use table::{SyncTable, UnknownTable};
