use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::record::{image_url, AnalysisStats, AnalysisSummary, ImageBlob, NewAnalysis, Verdict};
use crate::store::AnalysisStore;

/// PostgreSQL-backed analysis store using `sqlx`.
///
/// The record and its blob live in one row, so a save is visible only once
/// fully written. Connections are acquired from the pool per operation and
/// returned on every exit path.
pub struct PostgresAnalysisStore {
    pool: PgPool,
}

/// Columns `initialize` verifies when the table already exists. A mismatch
/// on any of these means some other structure owns the name.
const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("id", "bigint"),
    ("stored_name", "text"),
    ("original_name", "text"),
    ("byte_size", "bigint"),
    ("content_type", "text"),
    ("image_data", "bytea"),
    ("verdict", "text"),
    ("confidence", "double precision"),
    ("processing_time_ms", "bigint"),
    ("source_address", "text"),
    ("created_at", "timestamp with time zone"),
];

impl PostgresAnalysisStore {
    /// Connect to PostgreSQL with a sized connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config.url.as_deref().ok_or_else(|| {
            StoreError::StorageUnavailable("database.url is not configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(url)
            .await
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (useful for tests and tooling).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AnalysisStore for PostgresAnalysisStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id BIGSERIAL PRIMARY KEY,
                stored_name TEXT NOT NULL,
                original_name TEXT NOT NULL,
                byte_size BIGINT NOT NULL CHECK (byte_size >= 0),
                content_type TEXT NOT NULL,
                image_data BYTEA NOT NULL,
                verdict TEXT NOT NULL CHECK (verdict IN ('Real', 'Fake')),
                confidence DOUBLE PRECISION NOT NULL
                    CHECK (confidence >= 0.0 AND confidence <= 1.0),
                processing_time_ms BIGINT NOT NULL CHECK (processing_time_ms >= 0),
                source_address TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ddl_error)?;

        // CREATE TABLE IF NOT EXISTS is silent when a structure of the same
        // name already exists; verify it actually matches before touching it.
        self.verify_schema().await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analyses_created_at \
             ON analyses (created_at DESC, id DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(ddl_error)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_verdict ON analyses (verdict)")
            .execute(&self.pool)
            .await
            .map_err(ddl_error)?;

        info!("Analysis table initialized");
        Ok(())
    }

    #[instrument(skip(self, draft), fields(stored_name = %draft.stored_name))]
    async fn save(&self, draft: NewAnalysis) -> Result<i64, StoreError> {
        let byte_size = draft.byte_size();

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO analyses (
                stored_name, original_name, byte_size, content_type, image_data,
                verdict, confidence, processing_time_ms, source_address
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&draft.stored_name)
        .bind(&draft.original_name)
        .bind(byte_size)
        .bind(&draft.content_type)
        .bind(&draft.image_bytes)
        .bind(draft.verdict)
        .bind(draft.confidence)
        .bind(draft.processing_time_ms)
        .bind(&draft.source_address)
        .fetch_one(&self.pool)
        .await
        .map_err(write_error)?;

        debug!(id, byte_size, verdict = %draft.verdict, "Analysis persisted");
        metrics::counter!("analysis.store.saved").increment(1);

        Ok(id)
    }

    async fn list_recent(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSummary>, StoreError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT id, stored_name, original_name, byte_size, content_type,
                   verdict, confidence, processing_time_ms, created_at
            FROM analyses
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_image(&self, id: i64) -> Result<Option<ImageBlob>, StoreError> {
        let row: Option<(Vec<u8>, String, String)> = sqlx::query_as(
            "SELECT image_data, content_type, original_name FROM analyses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.map(|(bytes, content_type, original_name)| ImageBlob {
            bytes,
            content_type,
            original_name,
        }))
    }

    async fn statistics(&self) -> Result<AnalysisStats, StoreError> {
        let stats: AnalysisStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_analyses,
                COUNT(*) FILTER (WHERE verdict = 'Real') AS real_count,
                COUNT(*) FILTER (WHERE verdict = 'Fake') AS fake_count,
                COALESCE(AVG(confidence), 0)::DOUBLE PRECISION AS avg_confidence,
                COALESCE(AVG(processing_time_ms), 0)::DOUBLE PRECISION
                    AS avg_processing_time_ms
            FROM analyses
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn cleanup_oldest(&self, retention_count: i64) -> Result<u64, StoreError> {
        // Single statement so the "newest N" snapshot and the delete are
        // evaluated atomically; a save committing concurrently can only
        // grow the retained window, never lose a fresh record.
        let result = sqlx::query(
            r#"
            DELETE FROM analyses
            WHERE id IN (
                SELECT id FROM analyses
                ORDER BY created_at DESC, id DESC
                OFFSET $1
            )
            "#,
        )
        .bind(retention_count.max(0))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, retention_count, "Pruned old analyses");
        }

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

impl PostgresAnalysisStore {
    async fn verify_schema(&self) -> Result<(), StoreError> {
        let columns: Vec<(String, String)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = 'analyses'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        for (name, expected_type) in EXPECTED_COLUMNS {
            match columns.iter().find(|(n, _)| n == name) {
                None => {
                    return Err(StoreError::SchemaConflict(format!(
                        "analyses.{name} is missing"
                    )))
                }
                Some((_, found)) if found != expected_type => {
                    return Err(StoreError::SchemaConflict(format!(
                        "analyses.{name} has type {found}, expected {expected_type}"
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    id: i64,
    stored_name: String,
    original_name: String,
    byte_size: i64,
    content_type: String,
    verdict: Verdict,
    confidence: f64,
    processing_time_ms: i64,
    created_at: DateTime<Utc>,
}

impl From<SummaryRow> for AnalysisSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            image_url: image_url(row.id),
            id: row.id,
            stored_name: row.stored_name,
            original_name: row.original_name,
            byte_size: row.byte_size,
            content_type: row.content_type,
            verdict: row.verdict,
            confidence: row.confidence,
            processing_time_ms: row.processing_time_ms,
            created_at: row.created_at,
        }
    }
}

/// Connection-level failures are retryable; anything else during a write
/// means the write may not have durably completed.
fn write_error(e: sqlx::Error) -> StoreError {
    if is_connection_error(&e) {
        StoreError::StorageUnavailable(e.to_string())
    } else {
        StoreError::PersistenceFailure(e.to_string())
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::StorageUnavailable(e.to_string())
}

fn ddl_error(e: sqlx::Error) -> StoreError {
    if is_connection_error(&e) {
        StoreError::StorageUnavailable(e.to_string())
    } else {
        StoreError::SchemaConflict(e.to_string())
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_columns_cover_the_full_record() {
        let names: Vec<&str> = EXPECTED_COLUMNS.iter().map(|(n, _)| *n).collect();
        for required in [
            "id",
            "image_data",
            "verdict",
            "confidence",
            "processing_time_ms",
            "created_at",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }

    #[test]
    fn test_error_mapping_distinguishes_connection_failures() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(
            write_error(io),
            StoreError::StorageUnavailable(_)
        ));

        assert!(matches!(
            write_error(sqlx::Error::RowNotFound),
            StoreError::PersistenceFailure(_)
        ));
        assert!(matches!(
            ddl_error(sqlx::Error::RowNotFound),
            StoreError::SchemaConflict(_)
        ));
    }
}
