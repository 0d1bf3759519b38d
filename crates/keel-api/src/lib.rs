//! Backend sync API for Keel.
//!
//! Exposes the sync exchange over HTTP and owns the authoritative record
//! store. Split out as a library so integration tests can drive the
//! processor without a running server.

pub mod auth;
pub mod config;
pub mod error;
pub mod processor;
pub mod rate_limit;
pub mod routes;
pub mod sessions;
pub mod store;
