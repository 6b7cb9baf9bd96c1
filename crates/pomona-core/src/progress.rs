//! Progress reporting for harvest runs.
//!
//! The harvest service emits [`HarvestEvent`]s instead of logging or printing
//! directly, so the CLI, tests and any other host decide how to show them.

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::sync::{BatchHarvestSummary, SyncStats};

/// Number of recorded results between two [`HarvestEvent::Progress`] events.
pub const PROGRESS_INTERVAL: usize = 100;

/// Events emitted during a harvest.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    /// A multi-source batch started.
    BatchStarted { total_sources: usize },
    /// Harvesting of one source started.
    SourceStarted {
        index: usize,
        total: usize,
        name: &'a str,
        url: &'a str,
    },
    /// The enrichment id list was loaded.
    EnrichmentLoaded { count: usize },
    /// The catalog document is on local scratch storage.
    CatalogDownloaded { bytes: u64 },
    /// The first item was discovered and the job document created.
    JobCreated { job_id: Uuid },
    /// Periodic progress.
    Progress {
        recorded: usize,
        stats: &'a SyncStats,
        rate_per_sec: f64,
        elapsed: Duration,
    },
    /// One item failed.
    ItemFailed { remote_id: &'a str, error: &'a str },
    SourceCompleted {
        index: usize,
        total: usize,
        name: &'a str,
        stats: &'a SyncStats,
    },
    SourceFailed {
        index: usize,
        total: usize,
        name: &'a str,
        error: &'a str,
    },
    SourceCancelled {
        index: usize,
        total: usize,
        name: &'a str,
        stats: &'a SyncStats,
    },
    /// The batch stopped early.
    BatchCancelled {
        completed_sources: usize,
        total_sources: usize,
    },
    BatchCompleted { summary: &'a BatchHarvestSummary },
}

/// Trait for reporting harvest events.
pub trait ProgressReporter: Send + Sync {
    /// Called when a harvest event occurs.
    ///
    /// The default implementation does nothing (silent mode).
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that ignores all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Reporter that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::BatchStarted { total_sources } => {
                info!("Starting batch harvest of {} source(s)", total_sources);
            }
            HarvestEvent::SourceStarted {
                index,
                total,
                name,
                url,
            } => {
                info!("[Source {}/{}] {} ({})", index + 1, total, name, url);
            }
            HarvestEvent::EnrichmentLoaded { count } => {
                info!(count, "Enrichment list loaded");
            }
            HarvestEvent::CatalogDownloaded { bytes } => {
                info!(bytes, "Catalog downloaded");
            }
            HarvestEvent::JobCreated { job_id } => {
                info!(%job_id, "Harvest job created");
            }
            HarvestEvent::Progress {
                recorded,
                stats,
                rate_per_sec,
                elapsed,
            } => {
                info!(
                    recorded,
                    created = stats.created,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    failed = stats.failed,
                    rate = format!("{rate_per_sec:.1}/s"),
                    elapsed_secs = elapsed.as_secs(),
                    "Progress"
                );
            }
            HarvestEvent::ItemFailed { remote_id, error } => {
                warn!(remote_id, error, "Item failed");
            }
            HarvestEvent::SourceCompleted {
                index,
                total,
                name,
                stats,
            } => {
                info!(
                    "[Source {}/{}] {} completed: {} created, {} updated, {} unchanged, {} failed",
                    index + 1,
                    total,
                    name,
                    stats.created,
                    stats.updated,
                    stats.unchanged,
                    stats.failed
                );
            }
            HarvestEvent::SourceFailed {
                index,
                total,
                name,
                error,
            } => {
                warn!("[Source {}/{}] {} failed: {}", index + 1, total, name, error);
            }
            HarvestEvent::SourceCancelled {
                index,
                total,
                name,
                stats,
            } => {
                info!(
                    "[Source {}/{}] {} cancelled after {} item(s)",
                    index + 1,
                    total,
                    name,
                    stats.total()
                );
            }
            HarvestEvent::BatchCancelled {
                completed_sources,
                total_sources,
            } => {
                info!(
                    "Batch harvest cancelled after {}/{} source(s)",
                    completed_sources, total_sources
                );
            }
            HarvestEvent::BatchCompleted { summary } => {
                info!(
                    sources = summary.total_sources(),
                    successful = summary.successful_count(),
                    failed = summary.failed_count(),
                    items = summary.total_items(),
                    "Batch harvest completed"
                );
            }
        }
    }
}
