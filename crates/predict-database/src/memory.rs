//! In-memory store implementations.
//!
//! Used by tests and for running the worker without a database. A single
//! write lock serialises every mutation, which makes claiming atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

use predict_core::error::AppError;
use predict_core::result::AppResult;
use predict_core::types::{PageRequest, PageResponse};
use predict_entity::content::LastPrediction;
use predict_entity::job::{CreateJob, JobFilter, JobStatus, PredictionJob};

use crate::store::{ContentStore, JobStore, ReclaimedJobs};

/// Job store backed by a map guarded by an async lock.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, PredictionJob>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a job verbatim. Does not touch `updated_at`.
    pub async fn insert(&self, job: PredictionJob) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Snapshot of every stored job.
    pub async fn all(&self) -> Vec<PredictionJob> {
        self.jobs.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, data: &CreateJob) -> AppResult<PredictionJob> {
        let job = PredictionJob::new(data.clone(), Utc::now());
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_due_job(&self, now: DateTime<Utc>) -> AppResult<Option<PredictionJob>> {
        let mut jobs = self.jobs.write().await;

        let due: Vec<Uuid> = jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| job.id)
            .collect();
        if due.is_empty() {
            return Ok(None);
        }

        let pick = due[rand::rng().random_range(0..due.len())];
        let Some(job) = jobs.get_mut(&pick) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.processing_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &PredictionJob) -> AppResult<PredictionJob> {
        let mut jobs = self.jobs.write().await;
        let Some(slot) = jobs.get_mut(&job.id) else {
            return Err(AppError::not_found(format!("Job {} not found", job.id)));
        };
        *slot = job.clone();
        slot.updated_at = Utc::now();
        Ok(slot.clone())
    }

    async fn save_claimed(
        &self,
        job: &PredictionJob,
        claimed_at: DateTime<Utc>,
    ) -> AppResult<PredictionJob> {
        let mut jobs = self.jobs.write().await;
        let Some(slot) = jobs.get_mut(&job.id) else {
            return Err(AppError::not_found(format!("Job {} not found", job.id)));
        };
        if slot.status != JobStatus::Processing || slot.processing_at != Some(claimed_at) {
            return Err(AppError::conflict(format!(
                "Job {} is no longer held by this claim (status: {})",
                job.id, slot.status
            )));
        }
        *slot = job.clone();
        slot.updated_at = Utc::now();
        Ok(slot.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<PredictionJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn find_filtered(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&PredictionJob> =
            jobs.values().filter(|job| filter.matches(job)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(PageResponse::new(items, page, total))
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|job| job.status == status).count() as u64)
    }

    async fn cancel_pending(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        cancelled_by: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<PredictionJob>> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        if owner.is_some_and(|owner| job.enqueued_by != Some(owner)) {
            return Ok(None);
        }

        job.status = JobStatus::Cancelled;
        job.cancelled_by = Some(cancelled_by);
        job.cancelled_at = Some(now);
        job.next_run_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<ReclaimedJobs> {
        let mut jobs = self.jobs.write().await;
        let now = Utc::now();
        let mut reclaimed = ReclaimedJobs::default();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.processing_at.is_some_and(|at| at < cutoff)
            {
                job.expire_claim(max_attempts, now);
                job.updated_at = now;
                match job.status {
                    JobStatus::Failed => reclaimed.failed += 1,
                    _ => reclaimed.requeued += 1,
                }
            }
        }
        Ok(reclaimed)
    }
}

/// Content store that keeps the latest prediction per content item.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    contents: RwLock<HashMap<Uuid, Option<LastPrediction>>>,
}

impl MemoryContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a content item with no prediction yet.
    pub async fn insert_content(&self, id: Uuid) {
        self.contents.write().await.insert(id, None);
    }

    /// The recorded prediction for a content item, if any.
    pub async fn last_prediction(&self, id: Uuid) -> Option<LastPrediction> {
        self.contents.read().await.get(&id).cloned().flatten()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn record_last_prediction(
        &self,
        content_id: Uuid,
        prediction: &LastPrediction,
    ) -> AppResult<()> {
        let mut contents = self.contents.write().await;
        let Some(slot) = contents.get_mut(&content_id) else {
            return Err(AppError::not_found(format!(
                "Content {content_id} not found"
            )));
        };
        *slot = Some(prediction.clone());
        Ok(())
    }
}
