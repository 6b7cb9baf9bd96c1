//! Table definitions.

use pomona_core::error::AppError;
use sqlx::PgPool;

/// Statements creating the schema. Each one is executed separately.
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS datasets (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        source VARCHAR NOT NULL,
        remote_id VARCHAR NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        tags TEXT[] NOT NULL DEFAULT '{}',
        resources JSONB NOT NULL DEFAULT '[]'::jsonb,
        frequency VARCHAR NOT NULL DEFAULT 'unknown',
        license VARCHAR,
        extras JSONB NOT NULL DEFAULT '{}'::jsonb,
        last_modified TIMESTAMPTZ,
        first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uk_datasets_source_remote_id UNIQUE (source, remote_id),
        CONSTRAINT ck_datasets_title_not_empty CHECK (length(btrim(title)) > 0),
        CONSTRAINT ck_datasets_remote_id_not_empty CHECK (length(btrim(remote_id)) > 0)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS harvest_jobs (
        id UUID PRIMARY KEY,
        source VARCHAR NOT NULL,
        source_url VARCHAR NOT NULL,
        status VARCHAR NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        ended_at TIMESTAMPTZ,
        items JSONB NOT NULL DEFAULT '[]'::jsonb,
        errors JSONB NOT NULL DEFAULT '[]'::jsonb,
        stats JSONB NOT NULL DEFAULT '{}'::jsonb,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_harvest_jobs_source_created ON harvest_jobs(source, created_at DESC)",
];

/// Creates missing tables and indexes. Safe to run repeatedly.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "Schema ensured");
    Ok(())
}
