//! Engine configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a unit of work waits for its balance keys before giving up
    /// with a retryable conflict.
    pub lock_timeout: Duration,
    pub default_reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
    /// Postgres ledger; in-memory stores when absent.
    pub database_url: Option<String>,
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2000),
            default_reservation_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_millis(30_000),
            retry: RetryPolicy::default(),
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// default; malformed ones are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let ms = |name: &str, default: Duration| {
            parse_or(&lookup, name, default.as_millis() as u64).map_or(default, Duration::from_millis)
        };

        Self {
            lock_timeout: ms("STOCKLEDGER_LOCK_TIMEOUT_MS", defaults.lock_timeout),
            default_reservation_ttl: Duration::from_secs(
                parse_or(
                    &lookup,
                    "STOCKLEDGER_DEFAULT_RESERVATION_TTL_SECS",
                    defaults.default_reservation_ttl.as_secs(),
                )
                .unwrap_or(defaults.default_reservation_ttl.as_secs()),
            ),
            sweep_interval: ms("STOCKLEDGER_SWEEP_INTERVAL_MS", defaults.sweep_interval),
            retry: RetryPolicy {
                max_attempts: parse_or(
                    &lookup,
                    "STOCKLEDGER_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                )
                .unwrap_or(defaults.retry.max_attempts)
                .max(1),
                base_delay: ms("STOCKLEDGER_RETRY_BASE_DELAY_MS", defaults.retry.base_delay),
                ..defaults.retry
            },
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            bind_addr: lookup("STOCKLEDGER_BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Option<T>
where
    T: FromStr + Copy + core::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Some(default);
    };
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, default = %default, "malformed config value; using default");
            None
        }
    }
}
