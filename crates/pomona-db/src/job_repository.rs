//! Job repository for PostgreSQL.
//!
//! A job row is written once per checkpoint. Items, errors and counters are
//! JSONB columns rewritten in full on every save.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use pomona_core::SyncStats;
use pomona_core::error::AppError;
use pomona_core::job::{HarvestError, HarvestItem, HarvestJob, JobStatus};
use pomona_core::traits::JobStore;

/// PostgreSQL implementation of the job store.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    /// Create a new job repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// Helper struct for deserializing job rows from the database.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source: String,
    source_url: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    items: Json<Vec<HarvestItem>>,
    errors: Json<Vec<HarvestError>>,
    stats: Json<SyncStats>,
}

impl From<JobRow> for HarvestJob {
    fn from(row: JobRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|_| {
            tracing::warn!(job_id = %row.id, status = %row.status, "Unknown job status in store");
            JobStatus::Failed
        });

        Self {
            id: row.id,
            source: row.source,
            source_url: row.source_url,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            items: row.items.0,
            errors: row.errors.0,
            stats: row.stats.0,
        }
    }
}

const JOB_COLUMNS: &str =
    "id, source, source_url, status, created_at, started_at, ended_at, items, errors, stats";

// =============================================================================
// JobStore Trait Implementation
// =============================================================================

impl JobStore for JobRepository {
    async fn save_job(&self, job: &HarvestJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_jobs (
                id, source, source_url, status, created_at, started_at, ended_at,
                items, errors, stats, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                ended_at = EXCLUDED.ended_at,
                items = EXCLUDED.items,
                errors = EXCLUDED.errors,
                stats = EXCLUDED.stats,
                updated_at = NOW()
            "#,
        )
        .bind(job.id)
        .bind(&job.source)
        .bind(&job.source_url)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(Json(&job.items))
        .bind(Json(&job.errors))
        .bind(Json(&job.stats))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<HarvestJob>, AppError> {
        let query = format!("SELECT {} FROM harvest_jobs WHERE id = $1", JOB_COLUMNS);
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(&self, source: Option<&str>, limit: usize) -> Result<Vec<HarvestJob>, AppError> {
        let rows: Vec<JobRow> = match source {
            Some(source) => {
                let query = format!(
                    "SELECT {} FROM harvest_jobs WHERE source = $1 ORDER BY created_at DESC LIMIT $2",
                    JOB_COLUMNS
                );
                sqlx::query_as(&query)
                    .bind(source)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {} FROM harvest_jobs ORDER BY created_at DESC LIMIT $1",
                    JOB_COLUMNS
                );
                sqlx::query_as(&query)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
