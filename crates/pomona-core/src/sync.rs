//! Harvest outcome bookkeeping.
//!
//! Pure data types for per-item outcomes, per-run counters and multi-source
//! summaries, decoupled from I/O and CLI orchestration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobStatus;

/// Outcome of processing a single catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Record did not exist before this run
    Created,
    /// Stored record differed from the catalog and was rewritten
    Updated,
    /// Stored record matches the catalog, nothing written
    Unchanged,
    /// Item skipped for another reason (missing identifier)
    Skipped,
    /// Processing failed for this item
    Failed,
}

/// Counters for one harvest run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Skipped => self.skipped += 1,
            SyncOutcome::Failed => self.failed += 1,
        }
    }

    /// Returns the total number of recorded items.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped + self.failed
    }

    /// Returns the number of items that did not fail.
    pub fn successful(&self) -> usize {
        self.total() - self.failed
    }

    /// Items that were written to the store.
    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    /// Items that ended in the `skipped` item status (unchanged or otherwise).
    pub fn skipped_total(&self) -> usize {
        self.unchanged + self.skipped
    }
}

/// Result of a single-source harvest.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// `None` when the run was cancelled before any item was discovered.
    pub job_id: Option<Uuid>,
    pub stats: SyncStats,
    pub status: JobStatus,
}

impl SyncResult {
    /// Result of a run stopped before its job was created.
    pub fn cancelled_before_start() -> Self {
        Self {
            job_id: None,
            stats: SyncStats::default(),
            status: JobStatus::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }

    pub fn has_errors(&self) -> bool {
        self.status == JobStatus::DoneWithErrors
    }
}

/// Result of harvesting one source inside a batch.
#[derive(Debug, Clone)]
pub struct SourceHarvestResult {
    pub source_name: String,
    pub source_url: String,
    pub job_id: Option<Uuid>,
    pub stats: SyncStats,
    pub error: Option<String>,
}

impl SourceHarvestResult {
    pub fn success(source_name: String, source_url: String, result: SyncResult) -> Self {
        Self {
            source_name,
            source_url,
            job_id: result.job_id,
            stats: result.stats,
            error: None,
        }
    }

    pub fn failure(source_name: String, source_url: String, error: String) -> Self {
        Self {
            source_name,
            source_url,
            job_id: None,
            stats: SyncStats::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated results of a multi-source harvest.
#[derive(Debug, Clone, Default)]
pub struct BatchHarvestSummary {
    pub results: Vec<SourceHarvestResult>,
}

impl BatchHarvestSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: SourceHarvestResult) {
        self.results.push(result);
    }

    pub fn total_sources(&self) -> usize {
        self.results.len()
    }

    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total_sources() - self.successful_count()
    }

    /// Sum of recorded items over all sources.
    pub fn total_items(&self) -> usize {
        self.results.iter().map(|r| r.stats.total()).sum()
    }
}
