//! Prediction job processing.
//!
//! This crate provides:
//! - The job processor state machine (claim, execute, record outcome)
//! - Exponential retry backoff with jitter
//! - The prediction executor adapter and its subprocess implementation
//! - Metrics sinks for job counters and the queue depth gauge
//! - A worker runner that drives the processor on an interval
//! - A queue facade for enqueue, query, cancel, and requeue

pub mod backoff;
pub mod executor;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod runner;

pub use executor::{ExecutionOutput, ExecutorError, PredictionExecutor, SubprocessExecutor};
pub use metrics::{JobMetrics, MetricsSink, MetricsSnapshot, PrometheusMetrics};
pub use processor::{CycleOutcome, JobProcessor, RetryPolicy};
pub use queue::{JobQueue, QueueStats, Requester, Role};
pub use runner::WorkerRunner;
