use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub max_operations_per_request: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "max_operations_per_request",
                &self.max_operations_per_request,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "KEEL_API_BIND_ADDR", "127.0.0.1:3000");
        let database_path = value_or_default(&lookup, "KEEL_API_DATABASE_PATH", "keel-server.db");

        let jwt_secret = required_trimmed(&lookup, "KEEL_API_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "KEEL_API_JWT_SECRET must be at least 32 bytes".to_string(),
            ));
        }

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let sync_rate_limit_per_window =
            value_or_default(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", "60")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "SYNC_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&sync_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "SYNC_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let max_operations_per_request =
            value_or_default(&lookup, "MAX_OPERATIONS_PER_REQUEST", "200")
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "MAX_OPERATIONS_PER_REQUEST must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&max_operations_per_request) {
            return Err(ConfigError::Invalid(
                "MAX_OPERATIONS_PER_REQUEST must be in [1, 1000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            max_operations_per_request,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
