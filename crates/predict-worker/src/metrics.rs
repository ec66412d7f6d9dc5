//! Job metrics.
//!
//! The processor reports through the [`MetricsSink`] trait. [`JobMetrics`]
//! keeps in-process atomic counters that can be snapshotted, while
//! [`PrometheusMetrics`] forwards to the global `metrics` recorder.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{Counter, Gauge, counter, gauge};
use serde::{Deserialize, Serialize};

/// Receiver of job lifecycle counters and the queue depth gauge.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// A claimed job is about to be executed.
    fn incr_attempt(&self);
    /// A job reached `done`.
    fn incr_processed(&self);
    /// A job exhausted its attempts and reached `failed`.
    fn incr_failed(&self);
    /// Current number of pending jobs.
    fn set_queue_depth(&self, depth: u64);
}

/// In-process job counters.
#[derive(Debug, Default)]
pub struct JobMetrics {
    /// Total execution attempts.
    pub attempts: AtomicU64,
    /// Total jobs completed successfully.
    pub processed: AtomicU64,
    /// Total jobs that reached `failed`.
    pub failed: AtomicU64,
    /// Last observed pending count.
    pub queue_depth: AtomicU64,
}

impl JobMetrics {
    /// Create a zeroed collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for JobMetrics {
    fn incr_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`JobMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Total execution attempts.
    pub attempts: u64,
    /// Total jobs completed successfully.
    pub processed: u64,
    /// Total jobs that reached `failed`.
    pub failed: u64,
    /// Last observed pending count.
    pub queue_depth: u64,
}

/// Sink backed by the `metrics` facade.
///
/// Handles are resolved at construction, so build this after the global
/// recorder has been installed.
pub struct PrometheusMetrics {
    attempts: Counter,
    processed: Counter,
    failed: Counter,
    queue_depth: Gauge,
}

impl PrometheusMetrics {
    /// Register the job metrics with the installed recorder.
    pub fn new() -> Self {
        Self {
            attempts: counter!("job_attempts_total"),
            processed: counter!("jobs_processed_total"),
            failed: counter!("jobs_failed_total"),
            queue_depth: gauge!("job_queue_depth"),
        }
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn incr_attempt(&self) {
        self.attempts.increment(1);
    }

    fn incr_processed(&self) {
        self.processed.increment(1);
    }

    fn incr_failed(&self) {
        self.failed.increment(1);
    }

    fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.set(depth as f64);
    }
}
