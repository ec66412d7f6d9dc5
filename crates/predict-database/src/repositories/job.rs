//! Job repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use predict_core::error::{AppError, ErrorKind};
use predict_core::result::AppResult;
use predict_core::types::{PageRequest, PageResponse};
use predict_entity::job::{CreateJob, JobFilter, JobStatus, LEASE_EXPIRED_ERROR, PredictionJob};

use crate::store::{JobStore, ReclaimedJobs};

/// Repository for prediction job CRUD and queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn create(&self, data: &CreateJob) -> AppResult<PredictionJob> {
        let job = PredictionJob::new(data.clone(), Utc::now());
        sqlx::query_as::<_, PredictionJob>(
            "INSERT INTO prediction_jobs \
             (id, content_id, enqueued_by, status, input, attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 0, $6, $6) RETURNING *",
        )
        .bind(job.id)
        .bind(job.content_id)
        .bind(job.enqueued_by)
        .bind(job.status)
        .bind(&job.input)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))
    }

    /// Random order spreads retries across workers; SKIP LOCKED keeps
    /// concurrent claimers from blocking on the same row.
    async fn claim_due_job(&self, now: DateTime<Utc>) -> AppResult<Option<PredictionJob>> {
        sqlx::query_as::<_, PredictionJob>(
            "UPDATE prediction_jobs SET status = 'processing', processing_at = $1, updated_at = $1 \
             WHERE id = ( \
                SELECT id FROM prediction_jobs \
                WHERE status = 'pending' \
                AND (next_run_at IS NULL OR next_run_at <= $1) \
                ORDER BY random() \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED \
             ) AND status = 'pending' \
             RETURNING *",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))
    }

    async fn save(&self, job: &PredictionJob) -> AppResult<PredictionJob> {
        sqlx::query_as::<_, PredictionJob>(
            "UPDATE prediction_jobs SET \
                status = $2, result = $3, last_error = $4, attempts = $5, \
                next_run_at = $6, processing_at = $7, cancelled_by = $8, \
                cancelled_at = $9, processed_at = $10, updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(job.id)
        .bind(job.status)
        .bind(&job.result)
        .bind(&job.last_error)
        .bind(job.attempts)
        .bind(job.next_run_at)
        .bind(job.processing_at)
        .bind(job.cancelled_by)
        .bind(job.cancelled_at)
        .bind(job.processed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to save job", e))?
        .ok_or_else(|| AppError::not_found(format!("Job {} not found", job.id)))
    }

    async fn save_claimed(
        &self,
        job: &PredictionJob,
        claimed_at: DateTime<Utc>,
    ) -> AppResult<PredictionJob> {
        let saved = sqlx::query_as::<_, PredictionJob>(
            "UPDATE prediction_jobs SET \
                status = $2, result = $3, last_error = $4, attempts = $5, \
                next_run_at = $6, processing_at = $7, processed_at = $8, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' AND processing_at = $9 \
             RETURNING *",
        )
        .bind(job.id)
        .bind(job.status)
        .bind(&job.result)
        .bind(&job.last_error)
        .bind(job.attempts)
        .bind(job.next_run_at)
        .bind(job.processing_at)
        .bind(job.processed_at)
        .bind(claimed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to save job", e))?;

        match saved {
            Some(job) => Ok(job),
            None => match self.find_by_id(job.id).await? {
                Some(current) => Err(AppError::conflict(format!(
                    "Job {} is no longer held by this claim (status: {})",
                    job.id, current.status
                ))),
                None => Err(AppError::not_found(format!("Job {} not found", job.id))),
            },
        }
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<PredictionJob>> {
        sqlx::query_as::<_, PredictionJob>("SELECT * FROM prediction_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn find_filtered(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM prediction_jobs \
             WHERE ($1::job_status IS NULL OR status = $1) \
             AND ($2::uuid IS NULL OR enqueued_by = $2)",
        )
        .bind(filter.status)
        .bind(filter.enqueued_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))?;

        let jobs = sqlx::query_as::<_, PredictionJob>(
            "SELECT * FROM prediction_jobs \
             WHERE ($1::job_status IS NULL OR status = $1) \
             AND ($2::uuid IS NULL OR enqueued_by = $2) \
             ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
        )
        .bind(filter.status)
        .bind(filter.enqueued_by)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list jobs", e))?;

        Ok(PageResponse::new(jobs, page, total.max(0) as u64))
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM prediction_jobs WHERE status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to count jobs", e)
                })?;
        Ok(count.max(0) as u64)
    }

    async fn cancel_pending(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        cancelled_by: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PredictionJob>> {
        sqlx::query_as::<_, PredictionJob>(
            "UPDATE prediction_jobs SET status = 'cancelled', cancelled_by = $3, \
             cancelled_at = $4, next_run_at = NULL, updated_at = $4 \
             WHERE id = $1 AND status = 'pending' \
             AND ($2::uuid IS NULL OR enqueued_by = $2) \
             RETURNING *",
        )
        .bind(id)
        .bind(owner)
        .bind(cancelled_by)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to cancel job", e))
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<ReclaimedJobs> {
        let statuses: Vec<JobStatus> = sqlx::query_scalar(
            "UPDATE prediction_jobs SET \
                status = CASE WHEN attempts >= $2 THEN 'failed'::job_status \
                              ELSE 'pending'::job_status END, \
                last_error = CASE WHEN attempts >= $2 THEN $3 ELSE last_error END, \
                processed_at = CASE WHEN attempts >= $2 THEN NOW() ELSE processed_at END, \
                processing_at = NULL, next_run_at = NULL, updated_at = NOW() \
             WHERE status = 'processing' AND processing_at < $1 \
             RETURNING status",
        )
        .bind(cutoff)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(LEASE_EXPIRED_ERROR)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to reclaim stale jobs", e)
        })?;

        let failed = statuses
            .iter()
            .filter(|status| **status == JobStatus::Failed)
            .count() as u64;
        Ok(ReclaimedJobs {
            requeued: statuses.len() as u64 - failed,
            failed,
        })
    }
}
