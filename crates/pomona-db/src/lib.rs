//! Pomona DB - PostgreSQL stores for harvested records and jobs
//!
//! This crate provides the repository implementations of the store traits
//! defined in `pomona_core::traits`.
//!
//! # Overview
//!
//! The main components are:
//! - [`RecordRepository`] - Dataset records keyed by `(source, remote_id)`
//! - [`JobRepository`] - Harvest jobs with their items and errors as JSONB
//! - [`ensure_schema`] - Idempotent table creation

mod job_repository;
mod repository;
mod schema;

pub use job_repository::JobRepository;
pub use repository::RecordRepository;
pub use schema::{SCHEMA, ensure_schema};
