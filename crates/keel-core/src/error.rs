//! Error types for keel-core

use thiserror::Error;

/// Result type alias using keel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in keel-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network-level transport failure (connect, timeout, dropped connection)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sync endpoint returned a non-success status
    #[error("Sync API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// No recorded conflict for the given operation id
    #[error("Conflict not found for operation: {0}")]
    ConflictNotFound(String),
}

impl Error {
    /// Whether a failed sync exchange may be retried with backoff.
    ///
    /// Transport failures never confirm the server saw the request, and the
    /// protocol is replay-safe, so they are always retryable. API statuses
    /// are retryable only for throttling and server-side faults.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(Error::Transport("connection reset".to_string()).is_retryable());
    }

    #[test]
    fn api_errors_retry_only_on_throttle_or_server_fault() {
        let throttled = Error::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        let unavailable = Error::Api {
            status: 503,
            message: "maintenance".to_string(),
        };
        let rejected = Error::Api {
            status: 400,
            message: "bad payload".to_string(),
        };
        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn local_errors_are_not_retryable() {
        assert!(!Error::InvalidInput("empty record id".to_string()).is_retryable());
    }
}
