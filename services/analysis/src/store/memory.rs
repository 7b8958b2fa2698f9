use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::record::{image_url, AnalysisStats, AnalysisSummary, ImageBlob, NewAnalysis, Verdict};
use crate::store::AnalysisStore;

/// In-memory analysis store. Suitable for development and testing.
///
/// Mirrors the constraints the PostgreSQL backend enforces in DDL: a draft
/// that would violate a CHECK constraint there fails with
/// `PersistenceFailure` here as well.
pub struct MemoryAnalysisStore {
    records: RwLock<BTreeMap<i64, StoredAnalysis>>,
    next_id: AtomicI64,
}

struct StoredAnalysis {
    id: i64,
    stored_name: String,
    original_name: String,
    byte_size: i64,
    content_type: String,
    image_bytes: Vec<u8>,
    verdict: Verdict,
    confidence: f64,
    processing_time_ms: i64,
    #[allow(dead_code)]
    source_address: Option<String>,
    created_at: DateTime<Utc>,
}

impl MemoryAnalysisStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryAnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save(&self, draft: NewAnalysis) -> Result<i64, StoreError> {
        if !(0.0..=1.0).contains(&draft.confidence) {
            return Err(StoreError::PersistenceFailure(format!(
                "confidence {} outside [0.0, 1.0]",
                draft.confidence
            )));
        }
        if draft.processing_time_ms < 0 {
            return Err(StoreError::PersistenceFailure(format!(
                "negative processing time {}",
                draft.processing_time_ms
            )));
        }

        let mut records = self.records.write().unwrap();
        // Allocate the id under the write lock so ids and created_at agree
        // on insertion order.
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // created_at must be non-decreasing in id assignment order even if
        // the wall clock steps backwards.
        let now = Utc::now();
        let created_at = records
            .values()
            .next_back()
            .map_or(now, |last| last.created_at.max(now));

        records.insert(
            id,
            StoredAnalysis {
                id,
                stored_name: draft.stored_name,
                original_name: draft.original_name,
                byte_size: draft.image_bytes.len() as i64,
                content_type: draft.content_type,
                verdict: draft.verdict,
                confidence: draft.confidence,
                processing_time_ms: draft.processing_time_ms,
                source_address: draft.source_address,
                created_at,
                image_bytes: draft.image_bytes,
            },
        );

        Ok(id)
    }

    async fn list_recent(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSummary>, StoreError> {
        let records = self.records.read().unwrap();

        let mut ordered: Vec<&StoredAnalysis> = records.values().collect();
        ordered.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let summaries = ordered
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|r| AnalysisSummary {
                id: r.id,
                stored_name: r.stored_name.clone(),
                original_name: r.original_name.clone(),
                byte_size: r.byte_size,
                content_type: r.content_type.clone(),
                verdict: r.verdict,
                confidence: r.confidence,
                processing_time_ms: r.processing_time_ms,
                created_at: r.created_at,
                image_url: image_url(r.id),
            })
            .collect();

        Ok(summaries)
    }

    async fn get_image(&self, id: i64) -> Result<Option<ImageBlob>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.get(&id).map(|r| ImageBlob {
            bytes: r.image_bytes.clone(),
            content_type: r.content_type.clone(),
            original_name: r.original_name.clone(),
        }))
    }

    async fn statistics(&self) -> Result<AnalysisStats, StoreError> {
        let records = self.records.read().unwrap();

        let total = records.len() as i64;
        if total == 0 {
            return Ok(AnalysisStats::empty());
        }

        let real_count = records
            .values()
            .filter(|r| r.verdict == Verdict::Real)
            .count() as i64;
        let confidence_sum: f64 = records.values().map(|r| r.confidence).sum();
        let time_sum: f64 = records
            .values()
            .map(|r| r.processing_time_ms as f64)
            .sum();

        Ok(AnalysisStats {
            total_analyses: total,
            real_count,
            fake_count: total - real_count,
            avg_confidence: confidence_sum / total as f64,
            avg_processing_time_ms: time_sum / total as f64,
        })
    }

    async fn cleanup_oldest(&self, retention_count: i64) -> Result<u64, StoreError> {
        let mut records = self.records.write().unwrap();
        let keep = retention_count.max(0) as usize;

        if records.len() <= keep {
            return Ok(0);
        }

        let mut ordered: Vec<(DateTime<Utc>, i64)> = records
            .values()
            .map(|r| (r.created_at, r.id))
            .collect();
        ordered.sort_by(|a, b| b.cmp(a));

        let doomed: Vec<i64> = ordered.into_iter().skip(keep).map(|(_, id)| id).collect();
        let removed = doomed.len() as u64;
        for id in doomed {
            records.remove(&id);
        }

        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
