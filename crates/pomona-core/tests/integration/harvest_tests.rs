//! Integration tests for HarvestService.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pomona_core::metrics::names;
use pomona_core::{
    AppError, HarvestConfig, HarvestService, InMemoryMetrics, ItemStatus, JobStatus, SourceEntry,
    SpanContext,
};

use crate::integration::common::{
    MockCatalogClient, MockCatalogClientFactory, MockJobStore, MockRecordStore, RecordingReporter,
    TEST_SOURCE, catalog_xml, ids, indicator_xml, source,
};

fn service(
    records: &MockRecordStore,
    jobs: &MockJobStore,
    client: MockCatalogClient,
    config: HarvestConfig,
) -> HarvestService<MockRecordStore, MockJobStore, MockCatalogClientFactory> {
    HarvestService::with_config(
        records.clone(),
        jobs.clone(),
        MockCatalogClientFactory::new(client),
        config,
    )
}

#[tokio::test]
async fn test_harvest_creates_records() {
    // Arrange
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=3)));
    let service = service(&records, &jobs, client, HarvestConfig::default());

    // Act
    let result = service.harvest_source(&source()).await.unwrap();

    // Assert
    assert_eq!(result.status, JobStatus::Done);
    assert_eq!(result.stats.created, 3);
    assert_eq!(result.stats.total(), 3);
    assert_eq!(records.len(), 3);

    let record = records.get(TEST_SOURCE, "0002").unwrap();
    assert_eq!(record.title, "Indicador 0002");
    assert!(record.tags.contains(&"ine-pt".to_string()));
    assert!(record.tags.contains(&"populacao-ativa".to_string()));
    assert!(!record.tags.contains(&"hvd".to_string()));
    assert_eq!(record.license.as_deref(), Some("cc-by"));
    assert_eq!(
        record.extras.get("ine:language").map(String::as_str),
        Some("PT")
    );

    let job = jobs.job(result.job_id.unwrap()).unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.items.len(), 3);
    assert!(job.items.iter().all(|i| i.status == ItemStatus::Done));
    assert!(job.ended_at.is_some());
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    // Arrange
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=5))).with_enrichment(&["0003"]);
    let service = service(&records, &jobs, client, HarvestConfig::default());

    // Act
    let first = service.harvest_source(&source()).await.unwrap();
    let saves_after_first = records.save_count();
    let second = service.harvest_source(&source()).await.unwrap();

    // Assert
    assert_eq!(first.stats.created, 5);
    assert_eq!(second.stats.unchanged, 5);
    assert_eq!(second.stats.written(), 0);
    assert_eq!(second.status, JobStatus::Done);
    assert_eq!(records.save_count(), saves_after_first);

    let job = jobs.job(second.job_id.unwrap()).unwrap();
    assert!(job.items.iter().all(|i| i.status == ItemStatus::Skipped));
    assert!(
        job.items
            .iter()
            .all(|i| i.skip_reason.as_deref() == Some("unchanged"))
    );
}

#[tokio::test]
async fn test_changed_title_is_updated() {
    // Arrange
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let before = MockCatalogClient::new(catalog_xml(&ids(1..=2)));
    service(&records, &jobs, before, HarvestConfig::default())
        .harvest_source(&source())
        .await
        .unwrap();
    let original_id = records.get(TEST_SOURCE, "0002").unwrap().id;

    let changed = format!(
        "<catalog>{}{}</catalog>",
        indicator_xml("0001", "Indicador 0001"),
        indicator_xml("0002", "Taxa de desemprego (revista)")
    );
    let after = MockCatalogClient::new(changed);

    // Act
    let result = service(&records, &jobs, after, HarvestConfig::default())
        .harvest_source(&source())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.stats.updated, 1);
    assert_eq!(result.stats.unchanged, 1);
    let record = records.get(TEST_SOURCE, "0002").unwrap();
    assert_eq!(record.title, "Taxa de desemprego (revista)");
    assert_eq!(record.id, original_id);
}

#[tokio::test]
async fn test_full_sync_rewrites_unchanged_records() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=3)));
    service(&records, &jobs, client.clone(), HarvestConfig::default())
        .harvest_source(&source())
        .await
        .unwrap();

    let result = service(
        &records,
        &jobs,
        client,
        HarvestConfig::default().with_full_sync(),
    )
    .harvest_source(&source())
    .await
    .unwrap();

    assert_eq!(result.stats.updated, 3);
    assert_eq!(records.save_count(), 6);
}

#[tokio::test]
async fn test_failing_item_is_isolated() {
    // Arrange: nine catalog items plus a seed whose detail document is broken
    let mut catalog_ids = ids(1..=10);
    catalog_ids.retain(|id| id != "0005");
    let client = MockCatalogClient::new(catalog_xml(&catalog_ids)).with_detail(
        "0005",
        r#"<catalog><indicator id="0005"><title>Broken</titel></indicator></catalog>"#,
    );

    let mut source = source();
    source.seed_ids = vec!["0005".to_string()];

    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let service = service(&records, &jobs, client.clone(), HarvestConfig::default());

    // Act
    let result = service.harvest_source(&source).await.unwrap();

    // Assert
    assert_eq!(result.status, JobStatus::DoneWithErrors);
    assert_eq!(result.stats.created, 9);
    assert_eq!(result.stats.failed, 1);
    assert_eq!(client.detail_calls.load(Ordering::SeqCst), 1);

    let job = jobs.job(result.job_id.unwrap()).unwrap();
    assert_eq!(job.items.len(), 10);
    let failed: Vec<_> = job.failed_items().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].remote_id, "0005");
    assert_eq!(failed[0].errors[0].details.as_deref(), Some("parse"));
}

#[tokio::test]
async fn test_seed_missing_from_catalog_is_fetched() {
    let detail = format!(
        "<catalog><language>EN</language>{}</catalog>",
        indicator_xml("0099", "Seeded indicator")
    );
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=2))).with_detail("0099", detail);

    let mut source = source();
    source.seed_ids = vec!["0001".to_string(), "0099".to_string()];

    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let result = service(&records, &jobs, client.clone(), HarvestConfig::default())
        .harvest_source(&source)
        .await
        .unwrap();

    assert_eq!(result.stats.created, 3);
    assert_eq!(client.detail_calls.load(Ordering::SeqCst), 1);

    let seeded = records.get(TEST_SOURCE, "0099").unwrap();
    assert_eq!(seeded.title, "Seeded indicator");
    assert_eq!(seeded.extras.get("ine:language").map(String::as_str), Some("EN"));
    assert_eq!(
        seeded.extras.get("ine:extraction_date").map(String::as_str),
        Some("2024-05-01")
    );
}

#[tokio::test]
async fn test_checkpoints_every_interval() {
    // Arrange
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=25)));
    let config = HarvestConfig::default().with_checkpoint_interval(10);
    let service = service(&records, &jobs, client, config);

    // Act
    let result = service.harvest_source(&source()).await.unwrap();

    // Assert
    assert_eq!(result.stats.created, 25);
    assert_eq!(jobs.save_count(), 3, "saves at 10, 20 and the final flush");
    assert_eq!(records.save_count(), 25);
}

#[tokio::test]
async fn test_enrichment_tag_applied() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=3))).with_enrichment(&["0002", "9999"]);
    service(&records, &jobs, client, HarvestConfig::default())
        .harvest_source(&source())
        .await
        .unwrap();

    let enriched = records.get(TEST_SOURCE, "0002").unwrap();
    let plain = records.get(TEST_SOURCE, "0001").unwrap();
    assert!(enriched.tags.contains(&"hvd".to_string()));
    assert!(!plain.tags.contains(&"hvd".to_string()));
}

#[tokio::test]
async fn test_empty_catalog_aborts_without_job() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new("<catalog><language>PT</language></catalog>");

    let result = service(&records, &jobs, client, HarvestConfig::default())
        .harvest_source(&source())
        .await;

    assert!(matches!(result, Err(AppError::EmptyResponse)));
    assert_eq!(jobs.len(), 0);
}

#[tokio::test]
async fn test_catalog_broken_before_first_item_aborts() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(r#"<catalog><indicator id="1"><title>x</titel>"#);

    let result = service(&records, &jobs, client, HarvestConfig::default())
        .harvest_source(&source())
        .await;

    assert!(matches!(result, Err(AppError::ParseError(_))));
    assert_eq!(jobs.len(), 0);
    assert_eq!(records.len(), 0);
}

#[tokio::test]
async fn test_truncated_catalog_keeps_earlier_items() {
    let full = catalog_xml(&ids(1..=3));
    let truncated = &full[..full.rfind("<indicator id=\"0003\"").unwrap() + 40];
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(truncated);

    let result = service(&records, &jobs, client, HarvestConfig::default())
        .harvest_source(&source())
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::DoneWithErrors);
    assert_eq!(result.stats.created, 2);

    let job = jobs.job(result.job_id.unwrap()).unwrap();
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].details.as_deref(), Some("parse"));
}

#[tokio::test]
async fn test_enrichment_failure_aborts() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=2))).with_failing_enrichment();

    let result = service(&records, &jobs, client, HarvestConfig::default())
        .harvest_source(&source())
        .await;

    assert!(matches!(result, Err(AppError::RetriesExhausted { .. })));
    assert_eq!(jobs.len(), 0);
}

#[tokio::test]
async fn test_duplicate_ids_processed_once() {
    let catalog = format!(
        "<catalog>{}{}{}</catalog>",
        indicator_xml("0001", "First"),
        indicator_xml("0002", "Second"),
        indicator_xml("0001", "First again")
    );
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();

    let result = service(
        &records,
        &jobs,
        MockCatalogClient::new(catalog),
        HarvestConfig::default(),
    )
    .harvest_source(&source())
    .await
    .unwrap();

    assert_eq!(result.stats.total(), 2);
    assert_eq!(records.get(TEST_SOURCE, "0001").unwrap().title, "First");
}

#[tokio::test]
async fn test_missing_identifier_is_skipped() {
    let catalog = format!(
        "<catalog><indicator><title>No id</title></indicator>{}</catalog>",
        indicator_xml("0001", "With id")
    );
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();

    let result = service(
        &records,
        &jobs,
        MockCatalogClient::new(catalog),
        HarvestConfig::default(),
    )
    .harvest_source(&source())
    .await
    .unwrap();

    assert_eq!(result.stats.skipped, 1);
    assert_eq!(result.stats.created, 1);
    assert_eq!(result.status, JobStatus::Done);
}

#[tokio::test]
async fn test_item_timeout_fails_item() {
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=1)))
        .with_detail("0002", indicator_xml("0002", "Slow"))
        .with_detail_delay(std::time::Duration::from_millis(500));
    let mut source = source();
    source.seed_ids = vec!["0002".to_string()];

    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let config = HarvestConfig::default().with_item_timeout(std::time::Duration::from_millis(50));

    let result = service(&records, &jobs, client, config)
        .harvest_source(&source)
        .await
        .unwrap();

    assert_eq!(result.stats.created, 1);
    assert_eq!(result.stats.failed, 1);
    let job = jobs.job(result.job_id.unwrap()).unwrap();
    let failed = job.failed_items().next().unwrap();
    assert_eq!(failed.remote_id, "0002");
    assert_eq!(
        failed.errors[0].details.as_deref(),
        Some("transient_network")
    );
}

#[tokio::test]
async fn test_slow_record_save_does_not_time_out_other_items() {
    // Arrange: 0002 needs 200ms of its own work, the save of 0001 takes 400ms
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=2)));
    let records = MockRecordStore::new()
        .with_query_delay("0002", Duration::from_millis(150))
        .with_create_delay(Duration::from_millis(50))
        .with_save_delay(Duration::from_millis(400));
    let jobs = MockJobStore::new();
    let config = HarvestConfig::default()
        .with_workers(2)
        .with_item_timeout(Duration::from_millis(300));

    // Act
    let result = service(&records, &jobs, client, config)
        .harvest_source(&source())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.stats.failed, 0);
    assert_eq!(result.stats.created, 2);
    assert_eq!(result.status, JobStatus::Done);
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_metrics_and_progress_events() {
    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let metrics = Arc::new(InMemoryMetrics::new());
    let client = MockCatalogClient::new(catalog_xml(&ids(1..=4))).with_enrichment(&["0001"]);
    let service = service(&records, &jobs, client, HarvestConfig::default())
        .with_metrics(metrics.clone())
        .with_context(SpanContext);
    let reporter = RecordingReporter::default();

    service
        .harvest_source_with_progress(&source(), &reporter)
        .await
        .unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.counter(names::ITEMS_DISCOVERED), 4);
    assert_eq!(snapshot.counter(names::ITEMS_DONE), 4);
    assert_eq!(snapshot.counter(names::RECORD_SAVES), 4);
    assert_eq!(snapshot.timing(names::ITEM_DURATION).unwrap().count, 4);

    assert_eq!(
        reporter.events(),
        vec!["enrichment_loaded", "catalog_downloaded", "job_created"]
    );
}

#[tokio::test]
async fn test_batch_harvest_isolates_source_failures() {
    // Arrange
    let good = MockCatalogClient::new(catalog_xml(&ids(1..=2)));
    let bad = MockCatalogClient::new(catalog_xml(&ids(1..=2))).with_failing_enrichment();
    let factory = MockCatalogClientFactory::default()
        .with_source("good", good)
        .with_source("bad", bad);

    let records = MockRecordStore::new();
    let jobs = MockJobStore::new();
    let service = HarvestService::new(records.clone(), jobs.clone(), factory);

    let sources = [
        SourceEntry::new("bad", "https://bad.example.org/catalog.xml"),
        SourceEntry::new("good", "https://good.example.org/catalog.xml"),
        SourceEntry::new("unknown", "https://unknown.example.org/catalog.xml"),
    ];
    let refs: Vec<&SourceEntry> = sources.iter().collect();
    let reporter = RecordingReporter::default();

    // Act
    let summary = service
        .batch_harvest_with_progress_cancellable(
            &refs,
            &reporter,
            tokio_util::sync::CancellationToken::new(),
        )
        .await;

    // Assert
    assert_eq!(summary.total_sources(), 3);
    assert_eq!(summary.successful_count(), 1);
    assert_eq!(summary.failed_count(), 2);
    assert_eq!(summary.total_items(), 2);
    assert!(summary.results[0].error.is_some());
    assert!(summary.results[1].job_id.is_some());
    assert_eq!(records.len(), 2);

    let events = reporter.events();
    assert_eq!(events.first(), Some(&"batch_started"));
    assert_eq!(events.last(), Some(&"batch_completed"));
    assert_eq!(events.iter().filter(|e| **e == "source_failed").count(), 2);
}
