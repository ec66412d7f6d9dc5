//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job processor and scheduler driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the worker loop is started by `predictd`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in milliseconds between processing cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Attempt ceiling before a job is marked `failed`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base of the exponential retry backoff, in seconds.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_seconds: u64,
    /// Maximum number of characters kept in `last_error`.
    #[serde(default = "default_max_error_length")]
    pub max_error_length: usize,
    /// Jobs stuck in `processing` longer than this are released back to
    /// `pending`, or failed if that was their last attempt. Unset disables
    /// the reclaim step. Must exceed `executor.timeout_seconds`.
    #[serde(default)]
    pub lease_timeout_seconds: Option<u64>,
    /// How often the queue-depth gauge is refreshed, in seconds.
    #[serde(default = "default_depth_refresh")]
    pub queue_depth_refresh_seconds: u64,
}

impl WorkerConfig {
    /// Polling interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Lease timeout as a [`Duration`], if reclaim is enabled.
    pub fn lease_timeout(&self) -> Option<Duration> {
        self.lease_timeout_seconds.map(Duration::from_secs)
    }

    /// Queue-depth refresh interval as a [`Duration`].
    pub fn queue_depth_refresh(&self) -> Duration {
        Duration::from_secs(self.queue_depth_refresh_seconds.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            base_backoff_seconds: default_base_backoff(),
            max_error_length: default_max_error_length(),
            lease_timeout_seconds: None,
            queue_depth_refresh_seconds: default_depth_refresh(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff() -> u64 {
    5
}

fn default_max_error_length() -> usize {
    2000
}

fn default_depth_refresh() -> u64 {
    15
}
