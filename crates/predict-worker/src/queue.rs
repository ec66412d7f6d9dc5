//! Job queue facade for enqueuing, querying, and cancelling prediction jobs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use predict_core::error::AppError;
use predict_core::result::AppResult;
use predict_core::types::{PageRequest, PageResponse};
use predict_database::store::JobStore;
use predict_entity::job::{CreateJob, JobFilter, JobStatus, PredictionJob};

use crate::metrics::MetricsSink;

/// Role of a caller acting on jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user; may act only on their own jobs.
    User,
    /// Administrator; may act on any job.
    Admin,
}

/// Identity of the caller of a queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Calling user
    pub user_id: Uuid,
    /// Calling user's role
    pub role: Role,
}

impl Requester {
    /// A regular user.
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    /// An administrator.
    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Whether the caller has the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn can_access(&self, job: &PredictionJob) -> bool {
        self.is_admin() || job.enqueued_by == Some(self.user_id)
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Count per status, keyed by status name
    pub by_status: BTreeMap<String, u64>,
}

impl QueueStats {
    /// Count for one status.
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Sum over all statuses.
    pub fn total(&self) -> u64 {
        self.by_status.values().sum()
    }
}

/// Queue operations exposed to callers outside the worker loop.
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    /// Create a queue over a job store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Enqueue a new pending job.
    pub async fn enqueue(&self, data: CreateJob) -> AppResult<PredictionJob> {
        let job = self.store.create(&data).await?;
        tracing::debug!(
            "Enqueued prediction job: id={}, content={:?}, owner={:?}",
            job.id,
            job.content_id,
            job.enqueued_by
        );
        Ok(job)
    }

    /// Fetch a job by ID.
    pub async fn get(&self, id: Uuid) -> AppResult<PredictionJob> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }

    /// Fetch a job on behalf of a caller, who must own it or be an admin.
    pub async fn get_for(&self, id: Uuid, requester: &Requester) -> AppResult<PredictionJob> {
        let job = self.get(id).await?;
        if !requester.can_access(&job) {
            return Err(AppError::authorization("Not allowed to view this job"));
        }
        Ok(job)
    }

    /// List jobs newest first.
    pub async fn list(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>> {
        self.store.find_filtered(filter, page).await
    }

    /// List jobs visible to a caller; non-admins only see their own.
    pub async fn list_for(
        &self,
        requester: &Requester,
        status: Option<JobStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>> {
        let filter = JobFilter {
            status,
            enqueued_by: (!requester.is_admin()).then_some(requester.user_id),
        };
        self.list(&filter, page).await
    }

    /// Cancel a pending job.
    ///
    /// The owner or an admin may cancel. Jobs outside `pending` are
    /// rejected with a conflict and left untouched.
    pub async fn cancel(&self, id: Uuid, requester: &Requester) -> AppResult<PredictionJob> {
        let owner = (!requester.is_admin()).then_some(requester.user_id);
        if let Some(job) = self
            .store
            .cancel_pending(id, owner, requester.user_id, Utc::now())
            .await?
        {
            tracing::info!(
                "Cancelled prediction job: id={}, by={}",
                job.id,
                requester.user_id
            );
            return Ok(job);
        }

        // Nothing matched; work out why.
        let job = self.get(id).await?;
        if !requester.can_access(&job) {
            return Err(AppError::authorization("Not allowed to cancel this job"));
        }
        Err(AppError::conflict(format!(
            "Job not cancellable (status: {})",
            job.status
        )))
    }

    /// Create a fresh pending job from a failed or cancelled one.
    ///
    /// The original job is left as is.
    pub async fn requeue(&self, id: Uuid) -> AppResult<PredictionJob> {
        let original = self.get(id).await?;
        if !original.status.can_requeue() {
            return Err(AppError::conflict(format!(
                "Job cannot be requeued (status: {})",
                original.status
            )));
        }

        let job = self.store.create(&original.to_requeue()).await?;
        tracing::info!("Requeued prediction job: original={}, new={}", id, job.id);
        Ok(job)
    }

    /// Count jobs in every status.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let mut stats = QueueStats::default();
        for status in JobStatus::ALL {
            let count = self.store.count_by_status(status).await?;
            stats.by_status.insert(status.as_str().to_string(), count);
        }
        Ok(stats)
    }

    /// Publish the current pending count to the metrics sink.
    pub async fn refresh_queue_depth(&self, metrics: &dyn MetricsSink) -> AppResult<u64> {
        let depth = self.store.count_pending().await?;
        metrics.set_queue_depth(depth);
        Ok(depth)
    }
}
