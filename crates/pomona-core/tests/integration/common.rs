//! Test utilities and mock implementations for integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pomona_core::progress::{HarvestEvent, ProgressReporter};
use pomona_core::traits::{CatalogClient, CatalogClientFactory, JobStore, RecordStore};
use pomona_core::{
    AppError, EnrichmentSet, HarvestJob, SaveOptions, ScratchDocument, SourceEntry, StoredRecord,
};
use uuid::Uuid;

pub const TEST_SOURCE: &str = "ine";
pub const TEST_URL: &str = "https://catalog.example.org/xml_indic.jsp?opc=3";

// =============================================================================
// Catalog fixtures
// =============================================================================

/// One `<indicator>` element with a title, keywords and one resource.
pub fn indicator_xml(id: &str, title: &str) -> String {
    format!(
        r#"<indicator id="{id}">
    <title>{title}</title>
    <description>Indicador {id}</description>
    <keywords>Emprego; População ativa</keywords>
    <theme>Mercado de trabalho</theme>
    <periodicity>Trimestral</periodicity>
    <dates><last_update>01-02-2024</last_update></dates>
    <html><bdd_url>https://catalog.example.org/indicador?id={id}</bdd_url></html>
  </indicator>"#
    )
}

/// A catalog document listing `ids` in order.
pub fn catalog_xml(ids: &[String]) -> String {
    let items: Vec<String> = ids
        .iter()
        .map(|id| indicator_xml(id, &format!("Indicador {id}")))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<catalog>\n  <language>PT</language>\n  <extraction_date>2024-05-01</extraction_date>\n  {}\n</catalog>",
        items.join("\n  ")
    )
}

/// Zero-padded ids `0001..=count`.
pub fn ids(range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("{i:04}")).collect()
}

pub fn source() -> SourceEntry {
    SourceEntry::new(TEST_SOURCE, TEST_URL)
}

// =============================================================================
// MockCatalogClient
// =============================================================================

/// Catalog client serving fixed documents from memory.
#[derive(Clone)]
pub struct MockCatalogClient {
    catalog: Arc<String>,
    details: Arc<HashMap<String, Vec<u8>>>,
    enrichment: Option<Vec<String>>,
    fail_enrichment: bool,
    detail_delay: Duration,
    pub detail_calls: Arc<AtomicUsize>,
}

impl MockCatalogClient {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: Arc::new(catalog.into()),
            details: Arc::new(HashMap::new()),
            enrichment: None,
            fail_enrichment: false,
            detail_delay: Duration::ZERO,
            detail_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_detail(mut self, remote_id: &str, body: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.details).insert(remote_id.to_string(), body.into());
        self
    }

    pub fn with_enrichment(mut self, ids: &[&str]) -> Self {
        self.enrichment = Some(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_failing_enrichment(mut self) -> Self {
        self.fail_enrichment = true;
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }
}

impl CatalogClient for MockCatalogClient {
    async fn download_catalog(&self) -> Result<ScratchDocument, AppError> {
        ScratchDocument::from_bytes(self.catalog.as_bytes())
    }

    async fn fetch_detail(&self, remote_id: &str) -> Result<Vec<u8>, AppError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        self.details
            .get(remote_id)
            .cloned()
            .ok_or_else(|| AppError::HttpStatus {
                status: 404,
                url: format!("{TEST_URL}&varcd={remote_id}"),
            })
    }

    async fn fetch_enrichment(&self) -> Result<Option<EnrichmentSet>, AppError> {
        if self.fail_enrichment {
            return Err(AppError::RetriesExhausted {
                attempts: 5,
                last: Box::new(AppError::NetworkError("connection refused".to_string())),
            });
        }
        Ok(self
            .enrichment
            .as_ref()
            .map(|ids| ids.iter().cloned().collect()))
    }
}

// =============================================================================
// MockCatalogClientFactory
// =============================================================================

/// Factory returning a client per source name, or a default client.
#[derive(Clone, Default)]
pub struct MockCatalogClientFactory {
    clients: Arc<HashMap<String, MockCatalogClient>>,
    default: Option<MockCatalogClient>,
}

impl MockCatalogClientFactory {
    pub fn new(client: MockCatalogClient) -> Self {
        Self {
            clients: Arc::new(HashMap::new()),
            default: Some(client),
        }
    }

    pub fn with_source(mut self, name: &str, client: MockCatalogClient) -> Self {
        Arc::make_mut(&mut self.clients).insert(name.to_string(), client);
        self
    }
}

impl CatalogClientFactory for MockCatalogClientFactory {
    type Client = MockCatalogClient;

    fn create(&self, source: &SourceEntry) -> Result<Self::Client, AppError> {
        self.clients
            .get(&source.name)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| AppError::ConfigError(format!("no client for {}", source.name)))
    }
}

// =============================================================================
// MockRecordStore
// =============================================================================

/// In-memory record store keyed by `(source, remote_id)`.
#[derive(Clone, Default)]
pub struct MockRecordStore {
    records: Arc<Mutex<HashMap<(String, String), StoredRecord>>>,
    saves: Arc<AtomicUsize>,
    query_delays: Arc<HashMap<String, Duration>>,
    create_delay: Duration,
    save_delay: Duration,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays `query` for one remote id.
    pub fn with_query_delay(mut self, remote_id: &str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.query_delays).insert(remote_id.to_string(), delay);
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, source: &str, remote_id: &str) -> Option<StoredRecord> {
        let key = (source.to_string(), remote_id.to_string());
        self.records.lock().unwrap().get(&key).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl RecordStore for MockRecordStore {
    async fn query(&self, source: &str, remote_id: &str) -> Result<Option<StoredRecord>, AppError> {
        if let Some(delay) = self.query_delays.get(remote_id) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.get(source, remote_id))
    }

    async fn get_or_create(&self, source: &str, remote_id: &str) -> Result<StoredRecord, AppError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        Ok(self
            .get(source, remote_id)
            .unwrap_or_else(|| StoredRecord::new(source, remote_id)))
    }

    async fn save(&self, record: &StoredRecord, options: SaveOptions) -> Result<Uuid, AppError> {
        if options.validate {
            record.validate()?;
        }
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);

        let mut records = self.records.lock().unwrap();
        let key = (record.source.clone(), record.remote_id.clone());
        let id = records
            .get(&key)
            .and_then(|r| r.id)
            .or(record.id)
            .unwrap_or_else(Uuid::new_v4);

        let mut stored = record.clone();
        stored.id = Some(id);
        records.insert(key, stored);
        Ok(id)
    }
}

// =============================================================================
// MockJobStore
// =============================================================================

/// In-memory job store counting every save.
#[derive(Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, HarvestJob>>>,
    saves: Arc<AtomicUsize>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn job(&self, id: Uuid) -> Option<HarvestJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl JobStore for MockJobStore {
    async fn save_job(&self, job: &HarvestJob) -> Result<(), AppError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<HarvestJob>, AppError> {
        Ok(self.job(id))
    }

    async fn list_jobs(&self, source: Option<&str>, limit: usize) -> Result<Vec<HarvestJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<HarvestJob> = jobs
            .values()
            .filter(|job| source.is_none_or(|s| job.source == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

// =============================================================================
// RecordingReporter
// =============================================================================

/// Reporter collecting event names.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        let name = match event {
            HarvestEvent::BatchStarted { .. } => "batch_started",
            HarvestEvent::SourceStarted { .. } => "source_started",
            HarvestEvent::EnrichmentLoaded { .. } => "enrichment_loaded",
            HarvestEvent::CatalogDownloaded { .. } => "catalog_downloaded",
            HarvestEvent::JobCreated { .. } => "job_created",
            HarvestEvent::Progress { .. } => "progress",
            HarvestEvent::ItemFailed { .. } => "item_failed",
            HarvestEvent::SourceCompleted { .. } => "source_completed",
            HarvestEvent::SourceFailed { .. } => "source_failed",
            HarvestEvent::SourceCancelled { .. } => "source_cancelled",
            HarvestEvent::BatchCancelled { .. } => "batch_cancelled",
            HarvestEvent::BatchCompleted { .. } => "batch_completed",
        };
        self.events.lock().unwrap().push(name);
    }
}
