//! Periodic finalizer driver and the liveness probe derived from it.

use crate::db::Pool;
use crate::finalizer::finalize_next_completed_batch;
use crate::jobstore::JobStoreService;
use crate::metrics::Metrics;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Records the instant of the last finalizer attempt that completed
/// without an error, whether or not it found work. External health checks
/// consult `is_down`.
#[derive(Debug, Clone)]
pub struct Liveness {
    last_completed_attempt: Arc<Mutex<Instant>>,
}

impl Liveness {
    /// A fresh probe counts its own creation as the last good attempt, so
    /// it only reports down once `threshold` passes with no progress.
    pub fn new() -> Self {
        Self {
            last_completed_attempt: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn mark_attempt(&self) {
        self.mark_attempt_at(Instant::now());
    }

    pub fn mark_attempt_at(&self, at: Instant) {
        let mut guard = self
            .last_completed_attempt
            .lock()
            .expect("liveness mutex poisoned");
        *guard = at;
    }

    pub fn is_down(&self, threshold: Duration) -> bool {
        self.is_down_at(Instant::now(), threshold)
    }

    pub fn is_down_at(&self, now: Instant, threshold: Duration) -> bool {
        let last = *self
            .last_completed_attempt
            .lock()
            .expect("liveness mutex poisoned");
        now.saturating_duration_since(last) > threshold
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the finalizer on a fixed cadence.
///
/// Each tick drains every batch that is ready; errors are logged and
/// swallowed so the loop never dies, and an erroring attempt does not
/// advance the liveness mark.
pub async fn run_finalizer_loop(
    pool: Pool,
    jobstore: Arc<dyn JobStoreService>,
    metrics: Arc<dyn Metrics>,
    liveness: Liveness,
    poll_interval: Duration,
    claim_timeout_secs: i64,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        loop {
            match finalize_next_completed_batch(
                &pool,
                jobstore.as_ref(),
                metrics.as_ref(),
                claim_timeout_secs,
            )
            .await
            {
                Ok(true) => liveness.mark_attempt(),
                Ok(false) => {
                    liveness.mark_attempt();
                    debug!("no completed batch ready");
                    break;
                }
                Err(err) => {
                    error!(?err, "finalizer iteration failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::entries::NewEntry;
    use crate::jobstore::JobStoreError;
    use crate::metrics::NoopMetrics;
    use crate::model::{BatchName, Diagnostic, EntryStatus, ResultChunk, Severity};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fails every upload until `failing` is cleared.
    #[derive(Default)]
    struct FlakyJobStore {
        failing: AtomicBool,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl JobStoreService for FlakyJobStore {
        async fn add_chunk_ignoring_duplicates(
            &self,
            _chunk: &ResultChunk,
        ) -> Result<(), JobStoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(JobStoreError::Http {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".into(),
                });
            }
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Pinned to one connection: a pooled in-memory SQLite database lives
    // and dies with its connection.
    async fn setup_pool() -> Pool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loop_survives_upload_failures_and_holds_liveness_mark() {
        let pool = setup_pool().await;
        let entry = NewEntry {
            status: EntryStatus::Ignored,
            content: Vec::new(),
            metadata: String::new(),
            continued: false,
            tracking_id: "t".to_string(),
            priority: 0,
            diagnostics: vec![Diagnostic::new(Severity::Ok, "Ignored by processor")],
        };
        db::create_batch(&pool, &BatchName::new(1, 0), &[entry])
            .await
            .unwrap();

        let jobstore = Arc::new(FlakyJobStore::default());
        jobstore.failing.store(true, Ordering::SeqCst);
        let liveness = Liveness::new();
        let start = Instant::now();
        liveness.mark_attempt_at(start);

        let worker = tokio::spawn(run_finalizer_loop(
            pool.clone(),
            jobstore.clone(),
            Arc::new(NoopMetrics),
            liveness.clone(),
            Duration::from_millis(10),
            300,
        ));

        // While every upload fails the loop must keep ticking without
        // advancing the liveness mark.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(jobstore.uploads.load(Ordering::SeqCst), 0);
        assert!(liveness.is_down_at(Instant::now(), Duration::from_millis(100)));
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);

        // Once uploads succeed again the same loop retires the batch.
        jobstore.failing.store(false, Ordering::SeqCst);
        for _ in 0..100 {
            if jobstore.uploads.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        worker.abort();

        assert_eq!(jobstore.uploads.load(Ordering::SeqCst), 1);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(!liveness.is_down_at(Instant::now(), Duration::from_millis(100)));
    }

    #[test]
    fn fresh_probe_is_up() {
        let liveness = Liveness::new();
        assert!(!liveness.is_down(Duration::from_secs(60)));
    }

    #[test]
    fn probe_goes_down_after_threshold_without_attempts() {
        let liveness = Liveness::new();
        let start = Instant::now();
        liveness.mark_attempt_at(start);
        assert!(!liveness.is_down_at(start + Duration::from_secs(60), Duration::from_secs(60)));
        assert!(liveness.is_down_at(
            start + Duration::from_secs(61),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn attempt_resets_the_probe() {
        let liveness = Liveness::new();
        let start = Instant::now();
        liveness.mark_attempt_at(start);
        let later = start + Duration::from_secs(120);
        assert!(liveness.is_down_at(later, Duration::from_secs(60)));
        liveness.mark_attempt_at(later);
        assert!(!liveness.is_down_at(later + Duration::from_secs(1), Duration::from_secs(60)));
    }
}
