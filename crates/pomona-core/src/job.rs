//! Harvest job and per-item bookkeeping.
//!
//! A [`HarvestJob`] aggregates one [`HarvestItem`] per catalog item processed
//! in a run, plus job-level errors and counters.
//!
//! # Lifecycle
//!
//! Jobs flow through these states:
//! ```text
//! running → done
//!         → done-errors  (some items or the catalog tail failed)
//!         → cancelled    (stopped by the operator)
//!         → failed       (run aborted after the job was created)
//! ```
//!
//! Items move from `started` to exactly one of `done`, `skipped` or `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::sync::SyncStats;

// =============================================================================
// Job Status
// =============================================================================

/// Status of a harvest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Items are being processed.
    #[serde(rename = "running")]
    Running,
    /// All items finished without failure.
    #[serde(rename = "done")]
    Done,
    /// The run finished but some items or the catalog tail failed.
    #[serde(rename = "done-errors")]
    DoneWithErrors,
    /// The run aborted after the job was created.
    #[serde(rename = "failed")]
    Failed,
    /// The run was cancelled.
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl JobStatus {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::DoneWithErrors => "done-errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Error type for parsing JobStatus from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStatusError(String);

impl std::fmt::Display for ParseJobStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job status: {}", self.0)
    }
}

impl std::error::Error for ParseJobStatusError {}

impl std::str::FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "done-errors" => Ok(JobStatus::DoneWithErrors),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(ParseJobStatusError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Item Status
// =============================================================================

/// Status of a single harvested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Started,
    Done,
    Skipped,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Started => "started",
            ItemStatus::Done => "done",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemStatus::Started)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Errors and items
// =============================================================================

/// An error recorded against an item or a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestError {
    pub message: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HarvestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&AppError> for HarvestError {
    fn from(err: &AppError) -> Self {
        HarvestError::new(err.to_string()).with_details(err.category().as_str())
    }
}

/// Bookkeeping for one item within a harvest job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestItem {
    pub remote_id: String,
    pub status: ItemStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<HarvestError>,
    /// Store id of the record written for this item.
    pub record_id: Option<Uuid>,
    pub skip_reason: Option<String>,
}

impl HarvestItem {
    /// Creates an item in the `started` state.
    pub fn started(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            status: ItemStatus::Started,
            started_at: Utc::now(),
            ended_at: None,
            errors: Vec::new(),
            record_id: None,
            skip_reason: None,
        }
    }

    /// Moves the item to a terminal status. Returns false, leaving the item
    /// untouched, when it was already finalized.
    fn finalize(&mut self, status: ItemStatus) -> bool {
        if self.status.is_terminal() {
            tracing::warn!(
                remote_id = %self.remote_id,
                current = %self.status,
                requested = %status,
                "Ignoring second finalization of harvest item"
            );
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn mark_done(&mut self, record_id: Uuid) -> bool {
        let finalized = self.finalize(ItemStatus::Done);
        if finalized {
            self.record_id = Some(record_id);
        }
        finalized
    }

    pub fn mark_skipped(&mut self, reason: &str) -> bool {
        let finalized = self.finalize(ItemStatus::Skipped);
        if finalized {
            self.skip_reason = Some(reason.to_string());
        }
        finalized
    }

    pub fn mark_failed(&mut self, error: &AppError) -> bool {
        let finalized = self.finalize(ItemStatus::Failed);
        if finalized {
            self.errors.push(HarvestError::from(error));
        }
        finalized
    }
}

// =============================================================================
// Harvest Job
// =============================================================================

/// The aggregate record of one harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestJob {
    /// Unique job identifier.
    pub id: Uuid,

    /// Configured source name.
    pub source: String,

    /// Catalog URL harvested.
    pub source_url: String,

    /// Current job status.
    pub status: JobStatus,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When item processing began.
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished.
    pub ended_at: Option<DateTime<Utc>>,

    /// One entry per processed item, in completion order.
    pub items: Vec<HarvestItem>,

    /// Errors not tied to a single item.
    pub errors: Vec<HarvestError>,

    /// Outcome counters.
    pub stats: SyncStats,
}

impl HarvestJob {
    /// Creates a running job.
    pub fn new(source: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            source_url: source_url.into(),
            status: JobStatus::Running,
            created_at: now,
            started_at: Some(now),
            ended_at: None,
            items: Vec::new(),
            errors: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn record_error(&mut self, error: HarvestError) {
        self.errors.push(error);
    }

    /// Sets the terminal status and end time.
    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &HarvestItem> {
        self.items.iter().filter(|i| i.status == ItemStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.stats.failed > 0 || !self.errors.is_empty()
    }

    /// Run duration, when finished.
    pub fn duration(&self) -> Option<chrono::TimeDelta> {
        Some(self.ended_at? - self.started_at?)
    }
}
