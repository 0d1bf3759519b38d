//! Service layer for the client engine

mod client_store;

pub use client_store::ClientStore;
