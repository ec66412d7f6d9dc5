//! Listing filters for prediction jobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::PredictionJob;
use super::status::JobStatus;

/// Optional criteria for listing jobs. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs in this status.
    pub status: Option<JobStatus>,
    /// Only jobs enqueued by this user.
    pub enqueued_by: Option<Uuid>,
}

impl JobFilter {
    /// Filter on status only.
    pub fn by_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Filter on owner only.
    pub fn by_owner(owner: Uuid) -> Self {
        Self {
            enqueued_by: Some(owner),
            ..Self::default()
        }
    }

    /// Whether a job satisfies every set criterion.
    pub fn matches(&self, job: &PredictionJob) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self
                .enqueued_by
                .is_none_or(|owner| job.enqueued_by == Some(owner))
    }
}
