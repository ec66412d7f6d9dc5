//! Job processor: one claim-execute-record cycle at a time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use predict_core::config::WorkerConfig;
use predict_core::error::AppError;
use predict_core::result::AppResult;
use predict_database::store::{ContentStore, JobStore};
use predict_entity::content::LastPrediction;
use predict_entity::job::PredictionJob;

use crate::backoff::backoff_delay;
use crate::executor::{ExecutionOutput, PredictionExecutor};
use crate::metrics::MetricsSink;

/// Longest stderr excerpt logged for a failed run, in characters.
const STDERR_LOG_PREVIEW: usize = 1000;

/// What a single processing cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No job was due.
    Idle,
    /// Another cycle was still running in this process.
    Busy,
    /// The claimed job reached `done`.
    Completed(Uuid),
    /// The claimed job failed and was released for another attempt.
    Retrying {
        /// Job that will be retried
        job_id: Uuid,
        /// Earliest time of the next attempt
        next_run_at: DateTime<Utc>,
    },
    /// The claimed job exhausted its attempts.
    Failed(Uuid),
}

/// Retry limits applied by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling before terminal failure.
    pub max_attempts: u32,
    /// Base for exponential backoff, in seconds.
    pub base_backoff_seconds: u64,
    /// Maximum stored length of `last_error`, in characters.
    pub max_error_length: usize,
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff_seconds: config.base_backoff_seconds,
            max_error_length: config.max_error_length,
        }
    }
}

/// Claims due jobs, runs them through the executor, and records the outcome.
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn PredictionExecutor>,
    metrics: Arc<dyn MetricsSink>,
    content: Option<Arc<dyn ContentStore>>,
    policy: RetryPolicy,
    running: AtomicBool,
}

impl fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobProcessor")
            .field("policy", &self.policy)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Holds the reentrancy flag for the lifetime of one cycle.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobProcessor {
    /// Create a processor.
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn PredictionExecutor>,
        metrics: Arc<dyn MetricsSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            executor,
            metrics,
            content: None,
            policy,
            running: AtomicBool::new(false),
        }
    }

    /// Push prediction summaries to content items on success.
    pub fn with_content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    /// The job store this processor claims from.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// The metrics sink this processor reports to.
    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Retry limits this processor applies.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether a cycle is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one processing cycle.
    ///
    /// Executor failures never surface here; they become job state. Store
    /// errors abort the cycle and leave the last saved state in place. If
    /// the claim was reclaimed mid-cycle the save is refused with a
    /// `Conflict` and the job is left to its new claimant.
    pub async fn process_one(&self) -> AppResult<CycleOutcome> {
        let Some(_guard) = CycleGuard::acquire(&self.running) else {
            tracing::trace!("Previous cycle still running, skipping");
            return Ok(CycleOutcome::Busy);
        };

        let Some(mut job) = self.store.claim_due_job(Utc::now()).await? else {
            tracing::trace!("No due jobs");
            return Ok(CycleOutcome::Idle);
        };

        let claimed_at = job.processing_at.ok_or_else(|| {
            AppError::conflict(format!("Job {} was claimed without a claim time", job.id))
        })?;

        job.record_attempt();
        let job = self.store.save_claimed(&job, claimed_at).await?;
        self.metrics.incr_attempt();

        tracing::info!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = self.policy.max_attempts,
            "Processing prediction job"
        );

        match self.executor.execute(&job.input).await {
            Ok(output) if output.success() => {
                self.complete(job, claimed_at, &output.stdout).await
            }
            Ok(output) => {
                if !output.stderr.is_empty() {
                    tracing::warn!(
                        job_id = %job.id,
                        "Prediction stderr: {}",
                        truncate_chars(&output.stderr, STDERR_LOG_PREVIEW)
                    );
                }
                let message = failure_message(&output);
                self.record_failure(job, claimed_at, message).await
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, "Prediction could not run: {}", e);
                self.record_failure(job, claimed_at, e.to_string()).await
            }
        }
    }

    async fn complete(
        &self,
        mut job: PredictionJob,
        claimed_at: DateTime<Utc>,
        stdout: &str,
    ) -> AppResult<CycleOutcome> {
        let parsed = parse_output(stdout);
        let now = Utc::now();
        job.complete(parsed, now);
        let job = self.store.save_claimed(&job, claimed_at).await?;
        self.metrics.incr_processed();

        tracing::info!(job_id = %job.id, attempts = job.attempts, "Prediction job completed");

        self.push_last_prediction(&job, now).await;
        Ok(CycleOutcome::Completed(job.id))
    }

    async fn record_failure(
        &self,
        mut job: PredictionJob,
        claimed_at: DateTime<Utc>,
        message: String,
    ) -> AppResult<CycleOutcome> {
        let message = truncate_chars(&message, self.policy.max_error_length);
        let now = Utc::now();
        let attempts = u32::try_from(job.attempts).unwrap_or(0);

        if attempts >= self.policy.max_attempts {
            job.fail(message, now);
            let job = self.store.save_claimed(&job, claimed_at).await?;
            self.metrics.incr_failed();
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Prediction job failed after exhausting attempts"
            );
            return Ok(CycleOutcome::Failed(job.id));
        }

        let delay_ms = backoff_delay(attempts, self.policy.base_backoff_seconds);
        let next_run_at = retry_at(now, delay_ms);
        job.release_for_retry(message, next_run_at);
        let job = self.store.save_claimed(&job, claimed_at).await?;

        tracing::info!(
            job_id = %job.id,
            attempt = job.attempts,
            "Prediction job will retry in {}s",
            delay_ms.saturating_add(500) / 1000
        );
        Ok(CycleOutcome::Retrying {
            job_id: job.id,
            next_run_at,
        })
    }

    async fn push_last_prediction(&self, job: &PredictionJob, now: DateTime<Utc>) {
        let (Some(content), Some(content_id), Some(result)) =
            (&self.content, job.content_id, job.result.as_ref())
        else {
            return;
        };
        let Some(summary) = LastPrediction::from_result(result, now) else {
            return;
        };

        if let Err(e) = content.record_last_prediction(content_id, &summary).await {
            tracing::warn!(
                job_id = %job.id,
                content_id = %content_id,
                "Failed to persist prediction to content: {}",
                e
            );
        }
    }
}

/// Parse executor stdout, falling back to `{"raw": stdout}`.
pub fn parse_output(stdout: &str) -> Value {
    serde_json::from_str(stdout).unwrap_or_else(|_| json!({ "raw": stdout }))
}

/// Diagnostic for a non-zero exit: stderr, else stdout, else the exit code.
pub fn failure_message(output: &ExecutionOutput) -> String {
    [&output.stderr, &output.stdout]
        .into_iter()
        .find(|s| !s.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| format!("Process exited with code {}", output.exit_code))
}

fn truncate_chars(message: &str, max: usize) -> String {
    message.chars().take(max).collect()
}

fn retry_at(now: DateTime<Utc>, delay_ms: u64) -> DateTime<Utc> {
    i64::try_from(delay_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
