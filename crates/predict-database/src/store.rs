//! Persistence contracts consumed by the worker and the queue facade.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use predict_core::result::AppResult;
use predict_core::types::{PageRequest, PageResponse};
use predict_entity::content::LastPrediction;
use predict_entity::job::{CreateJob, JobFilter, JobStatus, PredictionJob};

/// Result of returning expired claims to the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimedJobs {
    /// Jobs put back to `pending`.
    pub requeued: u64,
    /// Jobs whose expired claim was their final attempt, now `failed`.
    pub failed: u64,
}

impl ReclaimedJobs {
    /// Total number of claims released.
    pub fn total(&self) -> u64 {
        self.requeued + self.failed
    }
}

/// Durable storage for prediction jobs.
///
/// Implementations must make [`JobStore::claim_due_job`] atomic: across
/// any number of concurrent callers a pending job is handed to at most one.
#[async_trait]
pub trait JobStore: Send + Sync + Debug + 'static {
    /// Insert a fresh pending job.
    async fn create(&self, data: &CreateJob) -> AppResult<PredictionJob>;

    /// Atomically claim one due pending job, moving it to `processing`.
    ///
    /// A job is due when `next_run_at` is unset or not after `now`. Which
    /// due job is picked is unspecified.
    async fn claim_due_job(&self, now: DateTime<Utc>) -> AppResult<Option<PredictionJob>>;

    /// Persist every field of a job, stamping `updated_at`.
    async fn save(&self, job: &PredictionJob) -> AppResult<PredictionJob>;

    /// Persist a job the caller claimed at `claimed_at`.
    ///
    /// Succeeds only while the stored row is still `processing` under that
    /// same claim. A claim that was reclaimed (and possibly claimed again)
    /// in the meantime is a `Conflict`, and nothing is written.
    async fn save_claimed(
        &self,
        job: &PredictionJob,
        claimed_at: DateTime<Utc>,
    ) -> AppResult<PredictionJob>;

    /// Look up a job by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<PredictionJob>>;

    /// List jobs matching a filter, newest first.
    async fn find_filtered(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>>;

    /// Count jobs in `pending` regardless of `next_run_at`.
    async fn count_pending(&self) -> AppResult<u64> {
        self.count_by_status(JobStatus::Pending).await
    }

    /// Count jobs in the given status.
    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64>;

    /// Cancel a job if and only if it is still pending.
    ///
    /// When `owner` is set the job must also have been enqueued by that
    /// user. Returns `None` when nothing was updated.
    async fn cancel_pending(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        cancelled_by: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PredictionJob>>;

    /// Release `processing` jobs claimed before `cutoff`.
    ///
    /// Jobs with fewer than `max_attempts` attempts go back to `pending`;
    /// the rest become `failed`, since the lost attempt was their last.
    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<ReclaimedJobs>;
}

/// Storage for content items that receive prediction summaries.
#[async_trait]
pub trait ContentStore: Send + Sync + Debug + 'static {
    /// Overwrite the content item's latest prediction.
    async fn record_last_prediction(
        &self,
        content_id: Uuid,
        prediction: &LastPrediction,
    ) -> AppResult<()>;
}
