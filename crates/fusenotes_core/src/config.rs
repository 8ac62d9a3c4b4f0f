//! Store runtime configuration.
//!
//! # Responsibility
//! - Hold tunables for the persistence pool, retry policy and sync timer.
//! - Load from JSON with per-field defaults.
//!
//! # Invariants
//! - A validated config has non-zero workers, queue capacity and attempts.
//! - The effective sync interval is never below `min_sync_interval_secs`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MIN_SYNC_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Parse(String),
    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Bounded exponential backoff for persistence writes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "retry_default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "retry_default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "retry_default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "retry_default_multiplier")]
    pub multiplier: f64,
}

fn retry_default_max_attempts() -> u32 {
    5
}

fn retry_default_initial_backoff_ms() -> u64 {
    100
}

fn retry_default_max_backoff_ms() -> u64 {
    5_000
}

fn retry_default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_default_max_attempts(),
            initial_backoff_ms: retry_default_initial_backoff_ms(),
            max_backoff_ms: retry_default_max_backoff_ms(),
            multiplier: retry_default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Tunables for one `NoteStore` session.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "store_default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "store_default_min_sync_interval_secs")]
    pub min_sync_interval_secs: u64,
    #[serde(default = "store_default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "store_default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "store_default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn store_default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn store_default_min_sync_interval_secs() -> u64 {
    DEFAULT_MIN_SYNC_INTERVAL_SECS
}

fn store_default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn store_default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn store_default_close_timeout_secs() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_SECS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            min_sync_interval_secs: DEFAULT_MIN_SYNC_INTERVAL_SECS,
            worker_threads: DEFAULT_WORKER_THREADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON config; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1",
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1",
            });
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: "must be a finite value >= 1",
            });
        }
        Ok(())
    }

    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_secs(self.min_sync_interval_secs)
    }

    /// Clamps a requested interval up to the configured minimum.
    pub fn clamp_sync_interval(&self, requested: Duration) -> Duration {
        requested.max(self.min_sync_interval())
    }

    pub fn sync_interval(&self) -> Duration {
        self.clamp_sync_interval(Duration::from_secs(self.sync_interval_secs))
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}
