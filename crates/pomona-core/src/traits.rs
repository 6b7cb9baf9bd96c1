//! Trait definitions for external dependencies.
//!
//! The harvest pipeline only talks to the catalog and the store through
//! these traits, so tests can swap in in-memory mocks.
//!
//! # Example
//!
//! ```
//! use pomona_core::traits::RecordStore;
//! use pomona_core::{AppError, SaveOptions};
//!
//! async fn touch<S: RecordStore>(store: &S, source: &str, id: &str) -> Result<uuid::Uuid, AppError> {
//!     let record = store.get_or_create(source, id).await?;
//!     store.save(&record, SaveOptions::unvalidated()).await
//! }
//! ```

use std::future::Future;

use uuid::Uuid;

use crate::config::SourceEntry;
use crate::job::HarvestJob;
use crate::models::{EnrichmentSet, SaveOptions, StoredRecord};
use crate::scratch::ScratchDocument;
use crate::AppError;

/// Client for one remote indicator catalog.
pub trait CatalogClient: Send + Sync + Clone + 'static {
    /// Downloads the full catalog document to a scratch file.
    fn download_catalog(&self) -> impl Future<Output = Result<ScratchDocument, AppError>> + Send;

    /// Fetches the single-item document for `remote_id`.
    ///
    /// Used for seed ids the catalog did not list.
    fn fetch_detail(&self, remote_id: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Fetches the enrichment id list.
    ///
    /// Returns `Ok(None)` when the source has no enrichment document.
    fn fetch_enrichment(&self) -> impl Future<Output = Result<Option<EnrichmentSet>, AppError>> + Send;
}

/// Factory for creating catalog clients.
///
/// Separate from CatalogClient to avoid issues with async trait constructors.
pub trait CatalogClientFactory: Send + Sync + Clone {
    /// The type of catalog client this factory creates.
    type Client: CatalogClient;

    /// Creates a client for the given source.
    fn create(&self, source: &SourceEntry) -> Result<Self::Client, AppError>;
}

/// Store for harvested records, keyed by `(source, remote_id)`.
pub trait RecordStore: Send + Sync + Clone + 'static {
    /// Looks up the record for `remote_id`, if one was stored before.
    fn query(
        &self,
        source: &str,
        remote_id: &str,
    ) -> impl Future<Output = Result<Option<StoredRecord>, AppError>> + Send;

    /// Returns the stored record, or a fresh unsaved one.
    fn get_or_create(
        &self,
        source: &str,
        remote_id: &str,
    ) -> impl Future<Output = Result<StoredRecord, AppError>> + Send;

    /// Inserts or updates a record.
    ///
    /// # Returns
    ///
    /// The store id of the written row.
    fn save(
        &self,
        record: &StoredRecord,
        options: SaveOptions,
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;
}

/// Store for harvest job documents.
pub trait JobStore: Send + Sync + Clone {
    /// Writes the whole job, replacing any earlier version.
    fn save_job(&self, job: &HarvestJob) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_job(&self, id: Uuid) -> impl Future<Output = Result<Option<HarvestJob>, AppError>> + Send;

    /// Most recent jobs first, optionally for one source.
    fn list_jobs(
        &self,
        source: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<HarvestJob>, AppError>> + Send;
}
