use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::AnalysisStore;

/// Spawn a background task that periodically prunes records beyond the
/// retention window.
///
/// Pruning failures are logged and swallowed here; retention must never
/// destabilize the foreground read/write path. Returns a `JoinHandle` the
/// caller can await after cancelling the token.
pub fn spawn_retention_task(
    store: Arc<dyn AnalysisStore>,
    keep_count: i64,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so we don't prune
        // at startup.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retention task shutting down");
                    return;
                }
                _ = timer.tick() => {
                    match store.cleanup_oldest(keep_count).await {
                        Ok(0) => {}
                        Ok(removed) => {
                            info!(removed, keep_count, "Retention pruned old analyses");
                            metrics::counter!("analysis.retention.deleted").increment(removed);
                        }
                        Err(e) => warn!(error = %e, "Retention pruning failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewAnalysis, Verdict};
    use crate::store::MemoryAnalysisStore;

    fn draft(i: usize) -> NewAnalysis {
        NewAnalysis {
            stored_name: format!("r{i}.png"),
            original_name: format!("r{i}.png"),
            content_type: "image/png".to_string(),
            image_bytes: vec![0u8; 16],
            verdict: Verdict::Real,
            confidence: 0.5,
            processing_time_ms: 1,
            source_address: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_task_prunes_on_schedule_and_stops_on_cancel() {
        let store = Arc::new(MemoryAnalysisStore::new());
        for i in 0..8 {
            store.save(draft(i)).await.unwrap();
        }

        let token = CancellationToken::new();
        let handle = spawn_retention_task(
            store.clone(),
            5,
            Duration::from_secs(60),
            token.clone(),
        );

        // Let the first scheduled tick fire under the paused clock.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.statistics().await.unwrap().total_analyses, 5);

        token.cancel();
        handle.await.unwrap();
    }
}
