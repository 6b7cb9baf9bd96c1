use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use pomona_cli::{Command, Config};
use pomona_client::IndicatorClientFactory;
use pomona_core::harvest::item_status_counts;
use pomona_core::traits::JobStore;
use pomona_core::{
    BatchHarvestSummary, DbConfig, HarvestConfig, HarvestJob, HarvestService, HarvestSettings,
    HttpConfig, InMemoryMetrics, MetricsSnapshot, SourceEntry, SpanContext, SyncResult,
    TracingReporter, load_sources_config,
};
use pomona_db::{JobRepository, RecordRepository, ensure_schema};

const RULE: &str = "═══════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

type Service = HarvestService<RecordRepository, JobRepository, IndicatorClientFactory, SpanContext>;

/// Overrides for one `harvest` invocation.
struct HarvestArgs {
    source_url: Option<String>,
    source: Option<String>,
    config: Option<PathBuf>,
    workers: Option<usize>,
    checkpoint_interval: Option<usize>,
    full_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let config = Config::parse();

    info!("Connecting to database...");
    let db_config = DbConfig::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    ensure_schema(&pool)
        .await
        .context("Failed to prepare database schema")?;

    let records = RecordRepository::new(pool.clone());
    let jobs = JobRepository::new(pool);

    match config.command {
        Command::Harvest {
            source_url,
            source,
            config: config_path,
            workers,
            checkpoint_interval,
            full_sync,
        } => {
            let args = HarvestArgs {
                source_url,
                source,
                config: config_path,
                workers,
                checkpoint_interval,
                full_sync,
            };
            handle_harvest(records, jobs, args).await?;
        }
        Command::Jobs { source, limit } => {
            list_jobs(&jobs, source.as_deref(), limit).await?;
        }
        Command::Job { id, failed } => {
            show_job(&jobs, id, failed).await?;
        }
        Command::Migrate => {
            info!("Database schema is up to date");
        }
    }

    Ok(())
}

/// Handle the harvest command with its three modes:
/// 1. Direct URL with default source settings
/// 2. Named source from config
/// 3. Batch mode (all enabled sources)
async fn handle_harvest(
    records: RecordRepository,
    jobs: JobRepository,
    args: HarvestArgs,
) -> anyhow::Result<()> {
    // A direct URL harvest does not read the sources file.
    let sources_config = match args.source_url {
        Some(_) => None,
        None => load_sources_config(args.config.clone())?,
    };

    let harvest_config = resolve_harvest_config(
        HarvestConfig::from_env(),
        sources_config.as_ref().map(|c| &c.harvest),
        &args,
    );
    info!(
        workers = harvest_config.workers,
        checkpoint_interval = harvest_config.checkpoint_interval,
        "Harvest settings"
    );

    let metrics = Arc::new(InMemoryMetrics::new());
    let factory = IndicatorClientFactory::new(HttpConfig::from_env())
        .context("Failed to build HTTP client")?
        .with_metrics(metrics.clone());
    let service: Service = HarvestService::with_config(records.clone(), jobs, factory, harvest_config)
        .with_context(SpanContext)
        .with_metrics(metrics.clone());

    let cancel_token = shutdown_token();
    let reporter = TracingReporter;

    match (args.source_url, args.source, sources_config) {
        // Mode 1: Direct URL
        (Some(url), _, _) => {
            let source = adhoc_source(&url);
            harvest_one(&service, &records, &source, &reporter, cancel_token).await?;
        }

        (None, _, None) => anyhow::bail!(
            "No configuration file found. Create ~/.config/pomona/sources.toml or use --config"
        ),

        // Mode 2: Named source from config
        (None, Some(name), Some(sources_config)) => {
            let source = sources_config
                .find_by_name(&name)
                .ok_or_else(|| anyhow::anyhow!("Source '{}' not found in configuration", name))?;

            if !source.enabled {
                info!("Note: source '{}' is marked as disabled in configuration", name);
            }

            harvest_one(&service, &records, source, &reporter, cancel_token).await?;
        }

        // Mode 3: Batch mode (all enabled sources)
        (None, None, Some(sources_config)) => {
            let enabled = sources_config.enabled_sources();
            if enabled.is_empty() {
                info!("No enabled sources found in configuration.");
                info!("Add sources to ~/.config/pomona/sources.toml or use: pomona harvest <url>");
                return Ok(());
            }

            let summary = service
                .batch_harvest_with_progress_cancellable(&enabled, &reporter, cancel_token)
                .await;
            print_batch_summary(&summary);
        }
    }

    print_metrics(&metrics.snapshot());
    Ok(())
}

/// Layers run settings: environment (in `base`), then the sources file, then
/// command-line flags.
fn resolve_harvest_config(
    base: HarvestConfig,
    file: Option<&HarvestSettings>,
    args: &HarvestArgs,
) -> HarvestConfig {
    let mut config = match file {
        Some(settings) => base.with_settings(settings),
        None => base,
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(interval) = args.checkpoint_interval {
        config = config.with_checkpoint_interval(interval);
    }
    if args.full_sync {
        config = config.with_full_sync();
    }
    config
}

async fn harvest_one(
    service: &Service,
    records: &RecordRepository,
    source: &SourceEntry,
    reporter: &TracingReporter,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    info!("Harvesting source: {} ({})", source.name, source.url);
    let result = service
        .harvest_source_with_progress_cancellable(source, reporter, cancel_token)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .with_context(|| format!("Harvest of '{}' failed", source.name))?;

    let stored = records.count_for_source(&source.name).await?;
    print_single_source_summary(source, &result, stored);
    Ok(())
}

/// Source settings for a catalog given only by URL. The host names the source.
fn adhoc_source(url: &str) -> SourceEntry {
    let name = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest)
        .split(['/', '?', ':'])
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or(url);
    SourceEntry::new(name, url)
}

/// A token cancelled on the first Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight items and saving the job...");
            trigger.cancel();
        }
    });
    token
}

/// Print a summary of batch harvesting results.
fn print_batch_summary(summary: &BatchHarvestSummary) {
    info!("");
    info!("{RULE}");
    info!("BATCH HARVEST COMPLETE");
    info!("{RULE}");
    info!("  Sources processed:   {}", summary.total_sources());
    info!("  Successful:          {}", summary.successful_count());
    info!("  Failed:              {}", summary.failed_count());
    info!("  Total items:         {}", summary.total_items());

    if summary.failed_count() > 0 {
        info!("{THIN_RULE}");
        info!("Failed sources:");
        for result in summary.results.iter().filter(|r| !r.is_success()) {
            if let Some(err) = &result.error {
                error!("  - {}: {}", result.source_name, err);
            }
        }
    }
    info!("{RULE}");
}

/// Print a summary for a single source harvest (modes 1 and 2).
fn print_single_source_summary(source: &SourceEntry, result: &SyncResult, stored: i64) {
    let stats = &result.stats;
    info!("");
    info!("{RULE}");
    info!("Harvest {}: {}", result.status, source.name);
    info!("{RULE}");
    if let Some(job_id) = result.job_id {
        info!("  Job:                 {}", job_id);
    }
    info!("  + Created:           {}", stats.created);
    info!("  ↑ Updated:           {}", stats.updated);
    info!("  = Unchanged:         {}", stats.unchanged);
    info!("  - Skipped:           {}", stats.skipped);
    info!("  ✗ Failed:            {}", stats.failed);
    info!("{THIN_RULE}");
    info!("  Total processed:     {}", stats.total());
    info!("  Records stored:      {}", stored);
    info!("{RULE}");

    if stats.failed > 0 {
        if let Some(job_id) = result.job_id {
            info!("Inspect failures with: pomona job {} --failed", job_id);
        }
    }
}

fn print_metrics(snapshot: &MetricsSnapshot) {
    if snapshot.counters.is_empty() && snapshot.timings.is_empty() {
        return;
    }
    info!("Metrics:");
    for (name, value) in &snapshot.counters {
        info!("  {:<32} {:>10}", name, value);
    }
    for (name, timing) in &snapshot.timings {
        info!(
            "  {:<32} n={} mean={:?} p95={:?} max={:?}",
            name, timing.count, timing.mean, timing.p95, timing.max
        );
    }
}

async fn list_jobs(jobs: &JobRepository, source: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let list = jobs.list_jobs(source, limit).await?;

    if list.is_empty() {
        println!("No harvest jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<12}  {:<23}  {:>6}  {:>7}  {:>6}",
        "ID", "SOURCE", "STATUS", "STARTED", "DONE", "SKIPPED", "FAILED"
    );
    for job in &list {
        let [(_, done), (_, skipped), (_, failed)] = item_status_counts(job);
        println!(
            "{:<36}  {:<12}  {:<12}  {:<23}  {:>6}  {:>7}  {:>6}",
            job.id,
            truncate(&job.source, 12),
            job.status.as_str(),
            format_timestamp(job.created_at),
            done,
            skipped,
            failed
        );
    }

    Ok(())
}

async fn show_job(jobs: &JobRepository, id: Uuid, failed_only: bool) -> anyhow::Result<()> {
    let job = jobs
        .get_job(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", id))?;

    print_job(&job, failed_only);
    Ok(())
}

fn print_job(job: &HarvestJob, failed_only: bool) {
    println!("Job:       {}", job.id);
    println!("Source:    {} ({})", job.source, job.source_url);
    println!("Status:    {}", job.status);
    println!("Created:   {}", format_timestamp(job.created_at));
    if let Some(ended) = job.ended_at {
        println!("Ended:     {}", format_timestamp(ended));
    }
    if let Some(duration) = job.duration() {
        println!("Duration:  {}", format_duration(duration));
    }
    for (status, count) in item_status_counts(job) {
        println!("  {:<8} {}", status.as_str(), count);
    }

    if !job.errors.is_empty() {
        println!();
        println!("Job errors:");
        for err in &job.errors {
            println!(
                "  [{}] {}",
                err.details.as_deref().unwrap_or("-"),
                err.message
            );
        }
    }

    let items: Vec<_> = if failed_only {
        job.failed_items().collect()
    } else {
        job.items.iter().collect()
    };
    if items.is_empty() {
        return;
    }

    println!();
    println!("Items:");
    for item in items {
        let note = item
            .errors
            .first()
            .map(|e| format!("{} ({})", e.message, e.details.as_deref().unwrap_or("-")))
            .or_else(|| item.skip_reason.clone())
            .unwrap_or_default();
        println!("  {:<12} {:<8} {}", item.remote_id, item.status.as_str(), note);
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn format_duration(duration: TimeDelta) -> String {
    let secs = duration.num_seconds().max(0);
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s:02}s"),
        (h, m, s) => format!("{h}h {m:02}m {s:02}s"),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
