//! Pomona - incremental harvester for XML indicator catalogs
//!
//! The `pomona` binary downloads a statistical indicator catalog, detects
//! which indicators changed since the last run, and writes the changed ones
//! to PostgreSQL together with a per-run harvest job.
//!
//! # Architecture
//!
//! - `pomona-core` - extraction, change detection, concurrent processing and checkpointing
//! - `pomona-client` - retrying HTTP fetcher and the catalog client
//! - `pomona-db` - PostgreSQL record and job stores
//! - [`config`] - command-line parsing for this binary

pub mod config;

pub use config::{Command, Config, version_info};
