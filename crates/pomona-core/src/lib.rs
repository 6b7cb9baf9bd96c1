//! Pomona Core - Domain types, extraction, change detection and the harvest service.
//!
//! This crate provides the core functionality for Pomona, including:
//!
//! - **Domain models**: [`CatalogItem`], [`StoredRecord`], [`HarvestJob`], etc.
//! - **Extraction**: [`CatalogReader`], a streaming reader over large XML catalogs
//! - **Business logic**: tag normalization, [`ChangeDetector`], [`RecordMapper`]
//! - **Services**: [`HarvestService`] for incremental catalog synchronization
//! - **Traits**: [`RecordStore`], [`JobStore`], [`CatalogClient`] for dependency injection
//! - **Progress reporting**: [`ProgressReporter`] trait for decoupled logging/UI
//!
//! # Architecture
//!
//! This crate is reusable by different frontends. Business logic is decoupled
//! from I/O through traits:
//!
//! - [`CatalogClient`] - abstracts catalog access (e.g., HTTP with retries)
//! - [`RecordStore`] and [`JobStore`] - abstract persistence (e.g., PostgreSQL)
//! - [`ExecutionContext`] - wraps the processing of each item
//!
//! # Example
//!
//! ```ignore
//! use pomona_core::{HarvestService, SourceEntry};
//! use pomona_core::progress::TracingReporter;
//!
//! let harvest = HarvestService::new(records, jobs, client_factory);
//! let source = SourceEntry::new("ine", "https://www.ine.pt/ine/xml_indic.jsp?opc=3&lang=PT");
//! let result = harvest
//!     .harvest_source_with_progress(&source, &TracingReporter)
//!     .await?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod extract;
pub mod harvest;
pub mod job;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod record;
pub mod retry;
pub mod scratch;
pub mod sync;
pub mod traits;

// Configuration
pub use config::{
    DbConfig, HarvestConfig, HarvestSettings, HttpConfig, SourceEntry, SourcesConfig,
    default_config_path, load_sources_config,
};

// Error handling
pub use error::{AppError, ErrorCategory};

// Domain models
pub use models::{
    CatalogContext, CatalogItem, EnrichmentSet, Frequency, IndicatorFields, ItemSource,
    ResourceRef, SaveOptions, StoredRecord,
};

// Extraction and normalization
pub use extract::{CatalogReader, extract_item, read_id_list};
pub use normalize::{normalize_tag, split_keywords, strip_accents};
pub use scratch::ScratchDocument;

// Change detection and record building
pub use detect::{ChangeDecision, ChangeDetector, TagPolicy};
pub use record::RecordMapper;

// Sync types
pub use sync::{BatchHarvestSummary, SourceHarvestResult, SyncOutcome, SyncResult, SyncStats};

// Jobs and persistence coordination
pub use checkpoint::{ItemOutcome, JobCoordinator, SkipReason};
pub use job::{HarvestError, HarvestItem, HarvestJob, ItemStatus, JobStatus};

// Retry and metrics
pub use metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use retry::{RetryPolicy, retry_with_backoff};

// Progress reporting
pub use progress::{HarvestEvent, ProgressReporter, SilentReporter, TracingReporter};

// Traits for dependency injection
pub use context::{DirectContext, ExecutionContext, SpanContext};
pub use traits::{CatalogClient, CatalogClientFactory, JobStore, RecordStore};

// Services (generic over trait implementations)
pub use harvest::HarvestService;
