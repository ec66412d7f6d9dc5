//! PostgreSQL repositories implementing the store contracts.

pub mod content;
pub mod job;

pub use content::ContentRepository;
pub use job::JobRepository;
