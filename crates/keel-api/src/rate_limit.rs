use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    sync_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    Sync,
    SyncAdmin,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    admin_allowed: AtomicU64,
    admin_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub admin_allowed: u64,
    pub admin_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window: config.rate_limit_window,
            sync_limit: config.sync_rate_limit_per_window,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.sync_limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.mark_limited(endpoint);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for sync endpoint",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.mark_allowed(endpoint);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            admin_allowed: self.metrics.admin_allowed.load(Ordering::Relaxed),
            admin_limited: self.metrics.admin_limited.load(Ordering::Relaxed),
        }
    }

    fn mark_allowed(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::Sync => {
                self.metrics.sync_allowed.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::SyncAdmin => {
                self.metrics.admin_allowed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn mark_limited(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::Sync => {
                self.metrics.sync_limited.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::SyncAdmin => {
                self.metrics.admin_limited.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::SyncAdmin => "sync_admin",
        }
    }
}

/// Stable hash of a user id for log lines; raw ids stay out of logs.
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
