//! Batched persistence of harvest results.
//!
//! Records are written as soon as their item finishes. The job document,
//! which grows with every item, is only written every `interval` results
//! and once more when the run finishes.

use std::sync::Arc;
use std::time::Instant;

use crate::error::AppError;
use crate::job::{HarvestError, HarvestItem, HarvestJob, ItemStatus, JobStatus};
use crate::metrics::{MetricsSink, NoopMetrics, names};
use crate::models::{SaveOptions, StoredRecord};
use crate::sync::{SyncOutcome, SyncStats};
use crate::traits::{JobStore, RecordStore};

/// Why an item was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stored record already matches the catalog.
    Unchanged,
    /// The catalog entry has no usable identifier.
    MissingIdentifier,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unchanged => "unchanged",
            SkipReason::MissingIdentifier => "missing identifier",
        }
    }
}

/// What processing produced for one item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// A finalized record ready to be written.
    Processed {
        record: Box<StoredRecord>,
        outcome: SyncOutcome,
    },
    Skipped(SkipReason),
    Failed(AppError),
}

/// Owns the in-memory job for one run and persists results.
///
/// Lives on the single task consuming worker results, so the job is never
/// shared between tasks.
pub struct JobCoordinator<S, J>
where
    S: RecordStore,
    J: JobStore,
{
    job: HarvestJob,
    records: S,
    jobs: J,
    metrics: Arc<dyn MetricsSink>,
    interval: usize,
    recorded: usize,
    checkpoints: usize,
}

impl<S, J> JobCoordinator<S, J>
where
    S: RecordStore,
    J: JobStore,
{
    /// Creates a coordinator checkpointing every `interval` results.
    pub fn new(job: HarvestJob, records: S, jobs: J, interval: usize) -> Self {
        Self {
            job,
            records,
            jobs,
            metrics: Arc::new(NoopMetrics),
            interval: interval.max(1),
            recorded: 0,
            checkpoints: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn job(&self) -> &HarvestJob {
        &self.job
    }

    pub fn stats(&self) -> &SyncStats {
        &self.job.stats
    }

    /// Number of item results recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Number of successful intermediate job saves.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    /// Persists the outcome of one item and appends it to the job.
    ///
    /// Returns the final status of the item.
    pub async fn record_result(&mut self, mut item: HarvestItem, outcome: ItemOutcome) -> ItemStatus {
        let sync_outcome = match outcome {
            ItemOutcome::Processed { record, outcome } => {
                let started = Instant::now();
                let saved = self.records.save(&record, SaveOptions::unvalidated()).await;
                self.metrics.increment(names::RECORD_SAVES, 1);
                self.metrics
                    .observe(names::RECORD_SAVE_DURATION, started.elapsed());

                match saved {
                    Ok(record_id) => {
                        item.mark_done(record_id);
                        outcome
                    }
                    Err(e) => {
                        tracing::warn!(
                            source = %self.job.source,
                            remote_id = %item.remote_id,
                            error = %e,
                            "Failed to save record"
                        );
                        item.mark_failed(&e);
                        SyncOutcome::Failed
                    }
                }
            }
            ItemOutcome::Skipped(reason) => {
                item.mark_skipped(reason.as_str());
                match reason {
                    SkipReason::Unchanged => SyncOutcome::Unchanged,
                    SkipReason::MissingIdentifier => SyncOutcome::Skipped,
                }
            }
            ItemOutcome::Failed(e) => {
                item.mark_failed(&e);
                SyncOutcome::Failed
            }
        };

        let status = item.status;
        match status {
            ItemStatus::Done => self.metrics.increment(names::ITEMS_DONE, 1),
            ItemStatus::Skipped => self.metrics.increment(names::ITEMS_SKIPPED, 1),
            ItemStatus::Failed => self.metrics.increment(names::ITEMS_FAILED, 1),
            ItemStatus::Started => {}
        }

        self.job.stats.record(sync_outcome);
        self.job.items.push(item);
        self.recorded += 1;

        if self.recorded % self.interval == 0 {
            self.checkpoint().await;
        }

        status
    }

    /// Records an error that belongs to the run rather than to one item.
    pub fn record_job_error(&mut self, error: &AppError) {
        tracing::warn!(
            source = %self.job.source,
            job_id = %self.job.id,
            error = %error,
            "Harvest job error"
        );
        self.job.record_error(HarvestError::from(error));
    }

    async fn checkpoint(&mut self) {
        let started = Instant::now();
        match self.jobs.save_job(&self.job).await {
            Ok(()) => {
                self.checkpoints += 1;
                self.metrics.increment(names::CHECKPOINTS, 1);
                self.metrics
                    .observe(names::CHECKPOINT_DURATION, started.elapsed());
                tracing::debug!(
                    job_id = %self.job.id,
                    recorded = self.recorded,
                    "Job checkpoint saved"
                );
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job.id,
                    recorded = self.recorded,
                    error = %e,
                    "Job checkpoint failed, continuing"
                );
            }
        }
    }

    /// Sets the terminal status and writes the job a final time.
    pub async fn finish(mut self, status: JobStatus) -> Result<HarvestJob, AppError> {
        self.job.finish(status);
        self.jobs.save_job(&self.job).await?;
        Ok(self.job)
    }
}
