//! Content entities touched by the queue.

pub mod prediction;

pub use prediction::LastPrediction;
