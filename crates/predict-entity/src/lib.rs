//! # predict-entity
//!
//! Domain entity models for the prediction job queue. Every struct in
//! this crate represents a database table row or a domain value object.
//! Row entities additionally derive `sqlx::FromRow`.

pub mod content;
pub mod job;
