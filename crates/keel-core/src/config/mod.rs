//! Client sync configuration

use serde::{Deserialize, Serialize};

use crate::sync::RetryPolicy;

/// Settings for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the keel-api server
    pub endpoint: String,
    /// Maximum operations per exchange
    pub batch_size: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Backoff schedule for retryable failures
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            batch_size: 50,
            request_timeout_secs: 15,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Build settings from the environment, falling back to defaults.
    ///
    /// Recognized variables: `KEEL_SYNC_ENDPOINT`, `KEEL_SYNC_BATCH_SIZE`,
    /// `KEEL_SYNC_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("KEEL_SYNC_ENDPOINT").unwrap_or(defaults.endpoint),
            batch_size: std::env::var("KEEL_SYNC_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size),
            request_timeout_secs: std::env::var("KEEL_SYNC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            retry: defaults.retry,
        }
    }
}
