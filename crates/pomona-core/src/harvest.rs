//! Harvest service for incremental catalog synchronization.
//!
//! # Architecture
//!
//! The [`HarvestService`] is generic over:
//! - [`RecordStore`] and [`JobStore`] - for persistence
//! - [`CatalogClientFactory`] - for creating catalog clients
//! - [`ExecutionContext`] - for the per-item scope (defaults to [`DirectContext`])
//!
//! # Pipeline
//!
//! ```text
//! download ─► scratch file ─► reader (blocking task) ─► bounded channel
//!                                                          │
//!              dispatcher ─► item tasks (≤ workers) ◄──────┘
//!                                 │
//!                      JobCoordinator (this task) ─► RecordStore / JobStore
//! ```
//!
//! The catalog is parsed on a blocking task while items are processed on
//! their own tasks, at most `workers` at a time. An item task keeps its
//! permit until the coordinator has taken its result, so a slow store slows
//! the reader down instead of buffering the whole catalog. Item timeouts
//! only cover the item's own work, never the coordinator's writes.
//!
//! # Abort vs. degrade
//!
//! A failed enrichment or catalog download, a catalog that breaks before its
//! first item and an empty catalog abort the run before any job exists.
//! Once a job exists, failures are recorded on the job and the run finishes
//! as `done-errors`.
//!
//! # Cancellation Support
//!
//! The `*_cancellable` methods accept a `CancellationToken`. On cancellation
//! discovery stops, in-flight items complete, and the job is saved with the
//! `cancelled` status.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{ItemOutcome, JobCoordinator, SkipReason};
use crate::config::{HarvestConfig, SourceEntry};
use crate::context::{DirectContext, ExecutionContext};
use crate::detect::ChangeDetector;
use crate::error::AppError;
use crate::extract::{CatalogReader, extract_item};
use crate::job::{HarvestItem, HarvestJob, ItemStatus, JobStatus};
use crate::metrics::{MetricsSink, NoopMetrics, names};
use crate::models::{CatalogContext, EnrichmentSet, ItemSource};
use crate::progress::{HarvestEvent, PROGRESS_INTERVAL, ProgressReporter, SilentReporter};
use crate::record::RecordMapper;
use crate::scratch::ScratchDocument;
use crate::sync::{BatchHarvestSummary, SourceHarvestResult, SyncResult};
use crate::traits::{CatalogClient, CatalogClientFactory, JobStore, RecordStore};

/// One item to process, with the catalog context at the point it was read.
#[derive(Debug)]
struct WorkUnit {
    source: ItemSource,
    context: Arc<CatalogContext>,
}

/// Messages from the catalog reader.
#[derive(Debug)]
enum Discovery {
    Unit(WorkUnit),
    /// The catalog could not be read further.
    Failed(AppError),
}

/// Results sent from the dispatcher to the coordinator.
enum Completion {
    Item(HarvestItem, ItemOutcome),
    /// An error that belongs to the job, such as a truncated catalog.
    JobError(AppError),
}

/// Per-run state shared by all item tasks.
struct ItemWorker<S, C, X> {
    source: String,
    records: S,
    client: C,
    context: X,
    detector: ChangeDetector,
    mapper: RecordMapper,
    metrics: Arc<dyn MetricsSink>,
    item_timeout: Duration,
    slow_item_threshold: Duration,
}

/// Service for harvesting indicator catalogs into a record store.
pub struct HarvestService<S, J, F, X = DirectContext>
where
    S: RecordStore,
    J: JobStore,
    F: CatalogClientFactory,
    X: ExecutionContext,
{
    records: S,
    jobs: J,
    factory: F,
    context: X,
    config: HarvestConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<S, J, F, X> Clone for HarvestService<S, J, F, X>
where
    S: RecordStore,
    J: JobStore,
    F: CatalogClientFactory,
    X: ExecutionContext,
{
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            jobs: self.jobs.clone(),
            factory: self.factory.clone(),
            context: self.context.clone(),
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S, J, F> HarvestService<S, J, F, DirectContext>
where
    S: RecordStore,
    J: JobStore,
    F: CatalogClientFactory,
{
    /// Creates a new harvest service with default configuration.
    pub fn new(records: S, jobs: J, factory: F) -> Self {
        Self::with_config(records, jobs, factory, HarvestConfig::default())
    }

    /// Creates a new harvest service with custom configuration.
    pub fn with_config(records: S, jobs: J, factory: F, config: HarvestConfig) -> Self {
        Self {
            records,
            jobs,
            factory,
            context: DirectContext,
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl<S, J, F, X> HarvestService<S, J, F, X>
where
    S: RecordStore,
    J: JobStore,
    F: CatalogClientFactory,
    X: ExecutionContext,
{
    /// Replaces the per-item execution context.
    pub fn with_context<Y: ExecutionContext>(self, context: Y) -> HarvestService<S, J, F, Y> {
        HarvestService {
            records: self.records,
            jobs: self.jobs,
            factory: self.factory,
            context,
            config: self.config,
            metrics: self.metrics,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvests one source.
    pub async fn harvest_source(&self, source: &SourceEntry) -> Result<SyncResult, AppError> {
        self.harvest_source_with_progress_cancellable(source, &SilentReporter, CancellationToken::new())
            .await
    }

    /// Harvests one source with progress reporting.
    pub async fn harvest_source_with_progress<R: ProgressReporter>(
        &self,
        source: &SourceEntry,
        reporter: &R,
    ) -> Result<SyncResult, AppError> {
        self.harvest_source_with_progress_cancellable(source, reporter, CancellationToken::new())
            .await
    }

    /// Harvests one source with cancellation support.
    pub async fn harvest_source_cancellable(
        &self,
        source: &SourceEntry,
        cancel_token: CancellationToken,
    ) -> Result<SyncResult, AppError> {
        self.harvest_source_with_progress_cancellable(source, &SilentReporter, cancel_token)
            .await
    }

    /// Harvests one source with progress reporting and cancellation support.
    ///
    /// Returns an error when the run aborts before the job is created.
    /// Afterwards item and catalog failures only affect the job status.
    pub async fn harvest_source_with_progress_cancellable<R: ProgressReporter>(
        &self,
        source: &SourceEntry,
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> Result<SyncResult, AppError> {
        let run_start = Instant::now();
        let client = self.factory.create(source)?;
        let seed_ids = source.resolve_seed_ids()?;

        let enrichment = match client.fetch_enrichment().await? {
            Some(set) => {
                reporter.report(HarvestEvent::EnrichmentLoaded { count: set.len() });
                set
            }
            None => EnrichmentSet::new(),
        };
        let enrichment = Arc::new(enrichment);

        let download_start = Instant::now();
        let document = client.download_catalog().await?;
        self.metrics
            .observe(names::CATALOG_DOWNLOAD_DURATION, download_start.elapsed());
        reporter.report(HarvestEvent::CatalogDownloaded {
            bytes: document.len(),
        });

        if cancel_token.is_cancelled() {
            return Ok(SyncResult::cancelled_before_start());
        }

        let policy = source.tag_policy();
        let worker = Arc::new(ItemWorker {
            source: source.name.clone(),
            records: self.records.clone(),
            client,
            context: self.context.clone(),
            detector: ChangeDetector::new(policy.clone(), Arc::clone(&enrichment))
                .with_force_full_sync(self.config.force_full_sync),
            mapper: RecordMapper::new(policy, enrichment)
                .with_extras_namespace(source.extras_namespace.clone())
                .with_license(source.license.clone()),
            metrics: Arc::clone(&self.metrics),
            item_timeout: self.config.item_timeout,
            slow_item_threshold: self.config.slow_item_threshold,
        });

        let workers = self.config.workers.max(1);
        let (tx, mut rx) = mpsc::channel(workers * 4);
        let producer = tokio::task::spawn_blocking({
            let cancel_token = cancel_token.clone();
            let metrics = Arc::clone(&self.metrics);
            let source_name = source.name.clone();
            move || discover_items(document, seed_ids, tx, cancel_token, metrics, source_name)
        });

        let first = match rx.recv().await {
            Some(Discovery::Unit(unit)) => unit,
            Some(Discovery::Failed(e)) => {
                let _ = producer.await;
                return Err(e);
            }
            None => {
                if let Err(e) = producer.await {
                    return Err(AppError::Generic(format!("catalog reader task failed: {e}")));
                }
                return Ok(SyncResult::cancelled_before_start());
            }
        };

        let job = HarvestJob::new(&source.name, &source.url);
        let job_id = job.id;
        reporter.report(HarvestEvent::JobCreated { job_id });
        tracing::info!(source = %source.name, %job_id, "Harvest job started");

        let mut coordinator = JobCoordinator::new(
            job,
            self.records.clone(),
            self.jobs.clone(),
            self.config.checkpoint_interval,
        )
        .with_metrics(Arc::clone(&self.metrics));

        let processing_start = Instant::now();
        let (done_tx, mut done_rx) = mpsc::channel(workers * 2);
        let dispatcher = tokio::spawn(dispatch_items(
            first,
            rx,
            worker,
            workers,
            done_tx,
            cancel_token.clone(),
        ));

        while let Some(completion) = done_rx.recv().await {
            match completion {
                Completion::Item(item, outcome) => {
                    if let ItemOutcome::Failed(e) = &outcome {
                        let error = e.to_string();
                        reporter.report(HarvestEvent::ItemFailed {
                            remote_id: &item.remote_id,
                            error: &error,
                        });
                    }
                    coordinator.record_result(item, outcome).await;

                    let recorded = coordinator.recorded();
                    if recorded % PROGRESS_INTERVAL == 0 {
                        let elapsed = processing_start.elapsed();
                        reporter.report(HarvestEvent::Progress {
                            recorded,
                            stats: coordinator.stats(),
                            rate_per_sec: recorded as f64 / elapsed.as_secs_f64().max(0.001),
                            elapsed,
                        });
                    }
                }
                Completion::JobError(e) => coordinator.record_job_error(&e),
            }
        }

        if let Err(e) = dispatcher.await {
            coordinator.record_job_error(&AppError::Generic(format!(
                "item dispatcher failed: {e}"
            )));
        }

        if let Err(e) = producer.await {
            coordinator.record_job_error(&AppError::Generic(format!(
                "catalog reader task failed: {e}"
            )));
        }

        let status = if cancel_token.is_cancelled() {
            JobStatus::Cancelled
        } else if coordinator.job().has_failures() {
            JobStatus::DoneWithErrors
        } else {
            JobStatus::Done
        };

        let job = coordinator.finish(status).await?;
        tracing::info!(
            source = %source.name,
            %job_id,
            status = %job.status,
            created = job.stats.created,
            updated = job.stats.updated,
            unchanged = job.stats.unchanged,
            failed = job.stats.failed,
            elapsed_secs = run_start.elapsed().as_secs(),
            "Harvest job finished"
        );

        Ok(SyncResult {
            job_id: Some(job.id),
            stats: job.stats,
            status: job.status,
        })
    }

    /// Harvests multiple sources sequentially with error isolation.
    pub async fn batch_harvest(&self, sources: &[&SourceEntry]) -> BatchHarvestSummary {
        self.batch_harvest_with_progress_cancellable(sources, &SilentReporter, CancellationToken::new())
            .await
    }

    /// Harvests multiple sources with cancellation support.
    pub async fn batch_harvest_cancellable(
        &self,
        sources: &[&SourceEntry],
        cancel_token: CancellationToken,
    ) -> BatchHarvestSummary {
        self.batch_harvest_with_progress_cancellable(sources, &SilentReporter, cancel_token)
            .await
    }

    /// Harvests multiple sources with progress reporting and cancellation support.
    ///
    /// A failing source is recorded in the summary and the batch moves on.
    pub async fn batch_harvest_with_progress_cancellable<R: ProgressReporter>(
        &self,
        sources: &[&SourceEntry],
        reporter: &R,
        cancel_token: CancellationToken,
    ) -> BatchHarvestSummary {
        let mut summary = BatchHarvestSummary::new();
        let total = sources.len();

        reporter.report(HarvestEvent::BatchStarted {
            total_sources: total,
        });

        for (i, source) in sources.iter().enumerate() {
            if cancel_token.is_cancelled() {
                reporter.report(HarvestEvent::BatchCancelled {
                    completed_sources: i,
                    total_sources: total,
                });
                break;
            }

            reporter.report(HarvestEvent::SourceStarted {
                index: i,
                total,
                name: &source.name,
                url: &source.url,
            });

            match self
                .harvest_source_with_progress_cancellable(source, reporter, cancel_token.clone())
                .await
            {
                Ok(result) => {
                    if result.is_cancelled() {
                        reporter.report(HarvestEvent::SourceCancelled {
                            index: i,
                            total,
                            name: &source.name,
                            stats: &result.stats,
                        });
                        summary.add(SourceHarvestResult::success(
                            source.name.clone(),
                            source.url.clone(),
                            result,
                        ));
                        reporter.report(HarvestEvent::BatchCancelled {
                            completed_sources: i + 1,
                            total_sources: total,
                        });
                        break;
                    }
                    reporter.report(HarvestEvent::SourceCompleted {
                        index: i,
                        total,
                        name: &source.name,
                        stats: &result.stats,
                    });
                    summary.add(SourceHarvestResult::success(
                        source.name.clone(),
                        source.url.clone(),
                        result,
                    ));
                }
                Err(e) => {
                    let error_str = e.to_string();
                    reporter.report(HarvestEvent::SourceFailed {
                        index: i,
                        total,
                        name: &source.name,
                        error: &error_str,
                    });
                    summary.add(SourceHarvestResult::failure(
                        source.name.clone(),
                        source.url.clone(),
                        error_str,
                    ));
                }
            }
        }

        if !cancel_token.is_cancelled() {
            reporter.report(HarvestEvent::BatchCompleted { summary: &summary });
        }

        summary
    }
}

// =============================================================================
// Item tasks
// =============================================================================

/// Spawns one task per work unit, at most `workers` at a time.
///
/// Runs on its own task so item work keeps going while the coordinator
/// writes. A finished task holds its permit until its result is accepted.
async fn dispatch_items<S, C, X>(
    first: WorkUnit,
    mut units: mpsc::Receiver<Discovery>,
    worker: Arc<ItemWorker<S, C, X>>,
    workers: usize,
    done: mpsc::Sender<Completion>,
    cancel_token: CancellationToken,
) where
    S: RecordStore,
    C: CatalogClient,
    X: ExecutionContext,
{
    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    let mut next = Some(Discovery::Unit(first));

    loop {
        let discovery = match next.take() {
            Some(discovery) => discovery,
            None => match units.recv().await {
                Some(discovery) => discovery,
                None => break,
            },
        };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        if cancel_token.is_cancelled() {
            break;
        }

        match discovery {
            Discovery::Unit(unit) => {
                let worker = Arc::clone(&worker);
                let done = done.clone();
                tasks.spawn(async move {
                    let (item, outcome) = worker.process_unit(unit).await;
                    let _ = done.send(Completion::Item(item, outcome)).await;
                    drop(permit);
                });
            }
            Discovery::Failed(e) => {
                drop(permit);
                let _ = done.send(Completion::JobError(e)).await;
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                let _ = done.send(task_failure(e)).await;
            }
        }
    }

    // Stops the reader when the loop ended early.
    drop(units);
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            let _ = done.send(task_failure(e)).await;
        }
    }
}

fn task_failure(e: JoinError) -> Completion {
    tracing::error!(error = %e, "Item task failed");
    Completion::JobError(AppError::Generic(format!("item task failed: {e}")))
}

impl<S, C, X> ItemWorker<S, C, X>
where
    S: RecordStore,
    C: CatalogClient,
    X: ExecutionContext,
{
    /// Processes one unit inside the execution context and the item timeout.
    ///
    /// Never fails: errors become [`ItemOutcome::Failed`].
    async fn process_unit(&self, unit: WorkUnit) -> (HarvestItem, ItemOutcome) {
        let remote_id = unit.source.remote_id().trim().to_string();
        let item = HarvestItem::started(&remote_id);
        if remote_id.is_empty() {
            return (item, ItemOutcome::Skipped(SkipReason::MissingIdentifier));
        }

        let started = Instant::now();
        let timeout = self.item_timeout;
        let outcome = self
            .context
            .scope(
                &remote_id,
                tokio::time::timeout(timeout, self.process_item(unit)),
            )
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout(timeout.as_secs())))
            .unwrap_or_else(ItemOutcome::Failed);

        let elapsed = started.elapsed();
        self.metrics.observe(names::ITEM_DURATION, elapsed);
        if elapsed > self.slow_item_threshold {
            self.metrics.increment(names::SLOW_ITEMS, 1);
            tracing::warn!(
                source = %self.source,
                remote_id = %remote_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow item"
            );
        }

        if let ItemOutcome::Failed(e) = &outcome {
            tracing::warn!(
                source = %self.source,
                remote_id = %remote_id,
                error = %e,
                "Failed to process item"
            );
        }

        (item, outcome)
    }

    async fn process_item(&self, unit: WorkUnit) -> Result<ItemOutcome, AppError> {
        let WorkUnit { source, context } = unit;
        let (item, item_context) = match source {
            ItemSource::FromCatalog(item) => (*item, (*context).clone()),
            ItemSource::FallbackFetch(remote_id) => {
                let bytes = self.client.fetch_detail(&remote_id).await?;
                let (item, detail_context) = extract_item(&bytes, &remote_id)?;
                (item, detail_context.or(&context))
            }
        };

        let stored = self.records.query(&self.source, &item.remote_id).await?;
        let decision = self.detector.decide(stored.as_ref(), &item);
        if !decision.is_change() {
            tracing::debug!(remote_id = %item.remote_id, "Record unchanged");
            return Ok(ItemOutcome::Skipped(SkipReason::Unchanged));
        }
        tracing::debug!(
            remote_id = %item.remote_id,
            reason = decision.reason,
            "Record changed"
        );

        let base = match stored {
            Some(record) => record,
            None => self.records.get_or_create(&self.source, &item.remote_id).await?,
        };
        let record = self.mapper.finalize(base, &item, &item_context);

        Ok(ItemOutcome::Processed {
            record: Box::new(record),
            outcome: decision.outcome,
        })
    }

}

/// Reads the scratch document and feeds work units into `tx`.
///
/// Runs on a blocking thread. Catalog items come first, deduplicated by id,
/// then the seed ids the catalog did not list.
fn discover_items(
    document: ScratchDocument,
    seed_ids: Vec<String>,
    tx: mpsc::Sender<Discovery>,
    cancel_token: CancellationToken,
    metrics: Arc<dyn MetricsSink>,
    source: String,
) {
    let reader = document.open().and_then(CatalogReader::new);
    let mut reader = match reader {
        Ok(reader) => reader,
        Err(e) => {
            let _ = tx.blocking_send(Discovery::Failed(e));
            return;
        }
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut context = Arc::new(reader.context().clone());

    while let Some(result) = reader.next() {
        if cancel_token.is_cancelled() {
            return;
        }

        let item = match result {
            Ok(item) => item,
            Err(e) => {
                let _ = tx.blocking_send(Discovery::Failed(e));
                return;
            }
        };

        if !item.remote_id.is_empty() && !seen.insert(item.remote_id.clone()) {
            tracing::warn!(
                source = %source,
                remote_id = %item.remote_id,
                "Duplicate indicator in catalog, keeping the first occurrence"
            );
            continue;
        }

        if *context != *reader.context() {
            context = Arc::new(reader.context().clone());
        }

        metrics.increment(names::ITEMS_DISCOVERED, 1);
        let unit = WorkUnit {
            source: ItemSource::FromCatalog(Box::new(item)),
            context: Arc::clone(&context),
        };
        if tx.blocking_send(Discovery::Unit(unit)).is_err() {
            return;
        }
    }

    if reader.items_read() == 0 {
        let _ = tx.blocking_send(Discovery::Failed(AppError::EmptyResponse));
        return;
    }

    let missing: Vec<String> = seed_ids
        .into_iter()
        .filter(|id| !seen.contains(id))
        .collect();
    if !missing.is_empty() {
        tracing::info!(
            source = %source,
            count = missing.len(),
            "Seed ids missing from catalog, fetching individually"
        );
    }

    for remote_id in missing {
        if cancel_token.is_cancelled() {
            return;
        }
        metrics.increment(names::ITEMS_DISCOVERED, 1);
        let unit = WorkUnit {
            source: ItemSource::FallbackFetch(remote_id),
            context: Arc::clone(&context),
        };
        if tx.blocking_send(Discovery::Unit(unit)).is_err() {
            return;
        }
    }
}

/// Terminal item statuses of a finished job, for summaries.
pub fn item_status_counts(job: &HarvestJob) -> [(ItemStatus, usize); 3] {
    let count = |status| job.items.iter().filter(|i| i.status == status).count();
    [
        (ItemStatus::Done, count(ItemStatus::Done)),
        (ItemStatus::Skipped, count(ItemStatus::Skipped)),
        (ItemStatus::Failed, count(ItemStatus::Failed)),
    ]
}
