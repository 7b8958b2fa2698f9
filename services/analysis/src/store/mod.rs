//! Persistence contract for analysis records.
//!
//! Two interchangeable backends implement the same trait: a PostgreSQL
//! store for production and an in-memory store for development and tests.
//! Callers hold `Arc<dyn AnalysisStore>` and never branch on the engine.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{AnalysisStats, AnalysisSummary, ImageBlob, NewAnalysis};

pub mod memory;
pub mod postgres;

pub use memory::MemoryAnalysisStore;
pub use postgres::PostgresAnalysisStore;

/// Trait for analysis record storage backends.
///
/// Implementations must be `Send + Sync` to be shared across async tasks.
/// Every operation acquires and releases its own connection; no connection
/// state outlives a single call.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Ensure the underlying structure exists with the expected schema and
    /// indexes. Idempotent. Fails with `SchemaConflict` if an incompatible
    /// structure already exists under the same name.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Persist a draft record together with its blob as one atomic unit.
    /// Returns the newly assigned identifier, unique and never reused.
    async fn save(&self, draft: NewAnalysis) -> Result<i64, StoreError>;

    /// Most recent records first (`created_at` descending, ties broken by
    /// identifier descending), without blob payloads. An offset past the
    /// end yields an empty sequence, not an error.
    async fn list_recent(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSummary>, StoreError>;

    /// Fetch the raw blob for one record. `None` is the not-found outcome.
    async fn get_image(&self, id: i64) -> Result<Option<ImageBlob>, StoreError>;

    /// Aggregate counts and means over all records. All zeros when empty.
    async fn statistics(&self) -> Result<AnalysisStats, StoreError>;

    /// Delete everything older than the most recent `retention_count`
    /// records. Returns the number deleted; a no-op when already under the
    /// cap. Safe to run concurrently with saves.
    async fn cleanup_oldest(&self, retention_count: i64) -> Result<u64, StoreError>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
