//! # predict-database
//!
//! Persistence for the prediction queue: the [`JobStore`] and
//! [`ContentStore`] contracts consumed by the worker, PostgreSQL
//! repositories implementing them, and an in-memory store for tests and
//! local development.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::{MemoryContentStore, MemoryJobStore};
pub use repositories::{ContentRepository, JobRepository};
pub use store::{ContentStore, JobStore, ReclaimedJobs};
