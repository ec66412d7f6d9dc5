//! Prediction job domain entities.

pub mod filter;
pub mod model;
pub mod status;

pub use filter::JobFilter;
pub use model::{CreateJob, LEASE_EXPIRED_ERROR, PredictionJob};
pub use status::JobStatus;
