//! Core library for Keel, an offline-first personal finance planner.
//!
//! Every mutation made on a device lands in a durable outbox first and is
//! pushed to the server opportunistically. The server is the single source
//! of truth; devices cache its records and converge toward it through sync
//! cycles. Concurrent edits are surfaced as conflicts for the user to
//! resolve, never merged silently.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod protocol;
pub mod services;
pub mod sync;

pub use error::{Error, Result};
