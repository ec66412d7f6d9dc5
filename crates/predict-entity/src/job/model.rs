//! Prediction job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::JobStatus;

/// `last_error` recorded when a claim expires on the job's final attempt.
pub const LEASE_EXPIRED_ERROR: &str = "Lease expired during final attempt";

/// A queued prediction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PredictionJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Content item the prediction is about, if any.
    pub content_id: Option<Uuid>,
    /// User who enqueued the job.
    pub enqueued_by: Option<Uuid>,
    /// Current job status.
    pub status: JobStatus,
    /// Opaque input handed to the executor.
    pub input: serde_json::Value,
    /// Opaque executor output; set only when `status = done`.
    pub result: Option<serde_json::Value>,
    /// Truncated diagnostic from the last failed attempt.
    pub last_error: Option<String>,
    /// Number of execution attempts made so far.
    pub attempts: i32,
    /// Earliest time the job may be claimed again (None = now).
    pub next_run_at: Option<DateTime<Utc>>,
    /// When the current claim was taken.
    pub processing_at: Option<DateTime<Utc>>,
    /// User who cancelled the job.
    pub cancelled_by: Option<Uuid>,
    /// When the job was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the job reached `done` or `failed`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl PredictionJob {
    /// Build a fresh pending job from creation data.
    pub fn new(data: CreateJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            content_id: data.content_id,
            enqueued_by: data.enqueued_by,
            status: JobStatus::Pending,
            input: data.input,
            result: None,
            last_error: None,
            attempts: 0,
            next_run_at: None,
            processing_at: None,
            cancelled_by: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Whether the job may be claimed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Count one more execution attempt.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Transition to `done` with the parsed executor output.
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.processed_at = Some(now);
        self.last_error = None;
        self.next_run_at = None;
        self.processing_at = None;
    }

    /// Release the job back to the queue, eligible again at `next_run_at`.
    pub fn release_for_retry(&mut self, error: String, next_run_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.last_error = Some(error);
        self.next_run_at = Some(next_run_at);
        self.processing_at = None;
    }

    /// Transition to terminal `failed`.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error);
        self.next_run_at = None;
        self.processed_at = Some(now);
        self.processing_at = None;
    }

    /// Give up an expired claim.
    ///
    /// Below `max_attempts` the job returns to `pending` and is due at once;
    /// otherwise the crashed attempt was its last and it fails.
    pub fn expire_claim(&mut self, max_attempts: u32, now: DateTime<Utc>) {
        if u32::try_from(self.attempts).unwrap_or(0) >= max_attempts {
            self.fail(LEASE_EXPIRED_ERROR.to_string(), now);
        } else {
            self.status = JobStatus::Pending;
            self.next_run_at = None;
            self.processing_at = None;
        }
    }

    /// Creation data for a fresh job carrying the same input.
    pub fn to_requeue(&self) -> CreateJob {
        CreateJob {
            content_id: self.content_id,
            enqueued_by: self.enqueued_by,
            input: self.input.clone(),
        }
    }
}

/// Data required to enqueue a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    /// Content item the prediction is about.
    pub content_id: Option<Uuid>,
    /// User enqueuing the job.
    pub enqueued_by: Option<Uuid>,
    /// Opaque executor input.
    pub input: serde_json::Value,
}

impl CreateJob {
    /// Creation data with only an input payload.
    pub fn with_input(input: serde_json::Value) -> Self {
        Self {
            content_id: None,
            enqueued_by: None,
            input,
        }
    }
}
