//! Sync transport
//!
//! The orchestrator talks to the server through this trait, so tests can
//! run a whole sync cycle against an in-process server.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::protocol::{SyncRequest, SyncResponse};

/// One request/response exchange with the sync endpoint
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse>;
}

/// HTTP transport against the keel-api sync endpoint
pub struct HttpSyncTransport {
    client: reqwest::Client,
    sync_url: String,
    token: String,
}

impl HttpSyncTransport {
    /// Build a transport for the given base endpoint and bearer token.
    ///
    /// Accepts the endpoint with or without a trailing slash.
    pub fn new(endpoint: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        let base = endpoint.trim_end_matches('/');
        Ok(Self {
            client,
            sync_url: format!("{base}/v1/sync"),
            token: token.into(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn exchange(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let response = self
            .client
            .post(&self.sync_url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SyncResponse>()
            .await
            .map_err(|e| Error::Transport(format!("malformed sync response: {e}")))
    }
}
