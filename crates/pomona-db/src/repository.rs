//! Record repository for PostgreSQL.
//!
//! Records are unique per `(source, remote_id)`. Saving upserts on that key,
//! so a record's id survives every later harvest of the same item.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use pomona_core::error::AppError;
use pomona_core::normalize::normalize_tag;
use pomona_core::traits::RecordStore;
use pomona_core::{ResourceRef, SaveOptions, StoredRecord};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Column list for SELECT queries. Must remain a const literal.
const RECORD_COLUMNS: &str =
    "id, source, remote_id, title, description, tags, resources, frequency, license, extras, last_modified";

/// Repository for dataset records.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use pomona_db::RecordRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/pomona")
///     .await?;
///
/// let repo = RecordRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Retrieves a record by store id.
    pub async fn get(&self, id: Uuid) -> Result<Option<StoredRecord>, AppError> {
        let query = format!("SELECT {} FROM datasets WHERE id = $1", RECORD_COLUMNS);
        let row: Option<RecordRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    /// Number of records stored for a source.
    pub async fn count_for_source(&self, source: &str) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM datasets WHERE source = $1")
            .bind(source)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    source: String,
    remote_id: String,
    title: String,
    description: String,
    tags: Vec<String>,
    resources: Json<Vec<ResourceRef>>,
    frequency: String,
    license: Option<String>,
    extras: Json<BTreeMap<String, String>>,
    last_modified: Option<DateTime<Utc>>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: Some(row.id),
            source: row.source,
            remote_id: row.remote_id,
            title: row.title,
            description: row.description,
            tags: row.tags,
            resources: row.resources.0,
            frequency: row.frequency.parse().unwrap_or_default(),
            license: row.license,
            extras: row.extras.0,
            last_modified: row.last_modified,
        }
    }
}

/// Tags as the store keeps them: normalized, deduplicated, sorted.
fn stored_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| normalize_tag(tag))
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Constraint violations surface as validation errors.
fn map_write_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_check_violation() || db.is_unique_violation() {
            return AppError::ValidationError(db.message().to_string());
        }
    }
    AppError::DatabaseError(err)
}

// =============================================================================
// RecordStore Trait Implementation
// =============================================================================

impl RecordStore for RecordRepository {
    async fn query(&self, source: &str, remote_id: &str) -> Result<Option<StoredRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM datasets WHERE source = $1 AND remote_id = $2",
            RECORD_COLUMNS
        );
        let row: Option<RecordRow> = sqlx::query_as(&query)
            .bind(source)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn get_or_create(&self, source: &str, remote_id: &str) -> Result<StoredRecord, AppError> {
        Ok(self
            .query(source, remote_id)
            .await?
            .unwrap_or_else(|| StoredRecord::new(source, remote_id)))
    }

    async fn save(&self, record: &StoredRecord, options: SaveOptions) -> Result<Uuid, AppError> {
        if options.validate {
            record.validate()?;
        }

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO datasets (
                id,
                source,
                remote_id,
                title,
                description,
                tags,
                resources,
                frequency,
                license,
                extras,
                last_modified,
                last_updated_at
            )
            VALUES (COALESCE($1, gen_random_uuid()), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (source, remote_id)
            DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                tags = EXCLUDED.tags,
                resources = EXCLUDED.resources,
                frequency = EXCLUDED.frequency,
                license = EXCLUDED.license,
                extras = EXCLUDED.extras,
                last_modified = EXCLUDED.last_modified,
                last_updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(&record.source)
        .bind(&record.remote_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(stored_tags(&record.tags))
        .bind(Json(&record.resources))
        .bind(record.frequency.as_str())
        .bind(&record.license)
        .bind(Json(&record.extras))
        .bind(record.last_modified)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        tracing::trace!(source = %record.source, remote_id = %record.remote_id, %id, "Record saved");
        Ok(id)
    }
}
