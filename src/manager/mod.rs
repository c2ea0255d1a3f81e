//! Top-level façade: accepts task submissions, wires the store, limiter,
//! retry policy and worker pool together, and exposes status queries,
//! cancellation and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{StoreError, ValidationError};
use crate::limiter::RateLimiter;
use crate::media::{Fetcher, Segmenter, TranscriptionClient};
use crate::merge::ChunkMerger;
use crate::retry::RetryPolicy;
use crate::scheduler::{Job, SchedulerContext, WorkerPool};
use crate::store::TaskStore;
use crate::task::{TaskId, TaskSnapshot};
use crate::utils;

pub struct Manager {
    config: Config,
    store: Arc<TaskStore>,
    queue: mpsc::UnboundedSender<Job>,
    pool: Mutex<Option<WorkerPool>>,
    accepting: AtomicBool,
}

impl Manager {
    /// Build the pipeline and start its worker pool. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        segmenter: Arc<dyn Segmenter>,
        client: Arc<dyn TranscriptionClient>,
    ) -> Self {
        let store = Arc::new(TaskStore::new());
        let limiter = Arc::new(RateLimiter::new(
            config.limiter.capacity,
            config.limiter.refill_per_sec,
        ));
        let chunk_retry = RetryPolicy::from_config(&config.retry);
        let task_retry = RetryPolicy::new(
            config.retry.task_stage_attempts,
            Duration::from_millis(config.retry.base_delay_ms),
            Duration::from_millis(config.retry.max_delay_ms),
        );

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(SchedulerContext {
            store: Arc::clone(&store),
            limiter,
            chunk_retry,
            task_retry,
            merger: ChunkMerger,
            fetcher,
            segmenter,
            client,
            queue: queue_tx,
            api_timeout: Duration::from_secs(config.api.timeout_secs),
            output_dir: config.output.dir.clone(),
        });
        let queue = ctx.queue.clone();
        let pool = WorkerPool::spawn(config.workers.count, ctx, queue_rx);
        info!(workers = config.workers.count, "transcription manager started");

        Self {
            config,
            store,
            queue,
            pool: Mutex::new(Some(pool)),
            accepting: AtomicBool::new(true),
        }
    }

    /// Submit a URL for transcription. Validation happens before any task
    /// is created; a URL with a live task is rejected as a duplicate.
    pub async fn submit(
        &self,
        url: &str,
        chunk_duration_override: Option<u64>,
    ) -> Result<TaskId, ValidationError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ValidationError(
                "manager is shutting down, not accepting work".to_string(),
            ));
        }

        let normalized = utils::validate_and_normalize_url(url)?;
        let chunk_duration =
            chunk_duration_override.unwrap_or(self.config.chunking.duration_secs);
        if chunk_duration == 0 {
            return Err(ValidationError("chunk duration must be positive".to_string()));
        }

        // check-and-create is atomic in the store, so two racing submissions
        // of the same URL cannot both produce a live task
        let id = self
            .store
            .create_unless_live(&normalized, chunk_duration)
            .await
            .map_err(|e| ValidationError(e.to_string()))?;
        if self.queue.send(Job::TaskStage(id)).is_err() {
            warn!(task = %id, "worker pool already stopped; task will not run");
        }
        info!(task = %id, url = %normalized, "task submitted");
        Ok(id)
    }

    /// Latest snapshot of one task.
    pub async fn status(&self, id: TaskId) -> Result<TaskSnapshot, StoreError> {
        self.store.snapshot(id).await
    }

    /// Snapshots of all tasks in submission order.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        self.store.list().await
    }

    /// Cancel a task. In-flight chunk results are discarded on arrival and
    /// queued jobs for the task are skipped; already-terminal tasks are
    /// left untouched.
    pub async fn cancel(&self, id: TaskId) -> Result<(), StoreError> {
        if self.store.cancel(id).await? {
            info!(task = %id, "task cancelled");
        } else {
            debug!(task = %id, "cancel ignored, task already terminal");
        }
        Ok(())
    }

    /// Stop accepting work, then stop the pool with the given grace period.
    /// Idempotent; later calls are no-ops. Task records remain queryable.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(pool) = self.pool.lock().await.take() {
            info!("manager shutting down");
            pool.shutdown(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, SplitError, TranscriptionError};
    use crate::media::{
        AudioSource, MediaHandle, MockFetcher, SegmentRef,
    };
    use crate::merge::GAP_MARKER;
    use crate::task::{ChunkStatus, TaskStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.workers.count = 4;
        config.limiter.capacity = 100;
        config.limiter.refill_per_sec = 1000.0;
        config.retry.max_attempts = 3;
        config.retry.base_delay_ms = 5;
        config.retry.max_delay_ms = 20;
        config.retry.task_stage_attempts = 2;
        config.api.timeout_secs = 5;
        config.output.dir = None;
        config
    }

    struct FakeFetcher {
        duration_secs: f64,
    }

    #[async_trait]
    impl crate::media::Fetcher for FakeFetcher {
        async fn fetch(&self, _url: &str) -> Result<AudioSource, FetchError> {
            Ok(AudioSource {
                handle: MediaHandle::new("/tmp/fake-audio.mp3"),
                duration_secs: Some(self.duration_secs),
                title: None,
            })
        }
    }

    struct FakeSegmenter;

    #[async_trait]
    impl crate::media::Segmenter for FakeSegmenter {
        async fn split(
            &self,
            source: &AudioSource,
            chunk_duration_secs: u64,
        ) -> Result<Vec<SegmentRef>, SplitError> {
            let total = source.duration_secs.unwrap_or(0.0);
            let chunk = chunk_duration_secs as f64;
            let count = (total / chunk).ceil() as usize;
            Ok((0..count)
                .map(|index| SegmentRef {
                    index,
                    handle: MediaHandle::new(format!("/tmp/segment-{index}.mp3")),
                    duration_secs: chunk.min(total - index as f64 * chunk),
                })
                .collect())
        }
    }

    /// Scripted per-segment behavior, keyed by the index embedded in the
    /// segment path by `FakeSegmenter`.
    #[derive(Default)]
    struct FakeClient {
        texts: HashMap<usize, String>,
        transient_failures: HashMap<usize, &'static str>,
        fatal_failures: HashMap<usize, &'static str>,
        calls: AtomicU32,
        /// When set, every call waits here before responding.
        gate: Option<Arc<Notify>>,
    }

    impl FakeClient {
        fn with_texts(texts: &[&str]) -> Self {
            Self {
                texts: texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (i, t.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    fn segment_index(handle: &MediaHandle) -> usize {
        let name = handle.path().file_stem().unwrap().to_string_lossy();
        name.trim_start_matches("segment-").parse().unwrap()
    }

    #[async_trait]
    impl crate::media::TranscriptionClient for FakeClient {
        async fn transcribe(&self, chunk: &MediaHandle) -> Result<String, TranscriptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let index = segment_index(chunk);
            if let Some(message) = self.fatal_failures.get(&index) {
                return Err(TranscriptionError::fatal(*message));
            }
            if let Some(message) = self.transient_failures.get(&index) {
                return Err(TranscriptionError::transient(*message));
            }
            Ok(self.texts.get(&index).cloned().unwrap_or_default())
        }
    }

    async fn wait_terminal(manager: &Manager, id: TaskId) -> TaskSnapshot {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = manager.status(id).await.unwrap();
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach a terminal state in time")
    }

    fn manager_with(client: FakeClient) -> Manager {
        Manager::new(
            test_config(),
            Arc::new(FakeFetcher { duration_secs: 900.0 }),
            Arc::new(FakeSegmenter),
            Arc::new(client),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_three_chunk_success() {
        let manager = manager_with(FakeClient::with_texts(&["Hello", "world", "end"]));
        let id = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();

        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.transcript.as_deref(), Some("Hello world end"));
        assert_eq!(snapshot.chunks.len(), 3);
        assert!(snapshot
            .chunks
            .iter()
            .all(|c| c.status == ChunkStatus::Succeeded && c.attempt_count == 1));

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_partial_failure_preserves_partial_transcript() {
        let mut client = FakeClient::with_texts(&["Hello", "world", "end"]);
        client.transient_failures.insert(1, "upstream 503");
        let manager = manager_with(client);

        let id = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(
            snapshot.transcript.as_deref(),
            Some(format!("Hello {GAP_MARKER} end").as_str())
        );
        assert_eq!(snapshot.error.as_deref(), Some("1 chunk(s) failed transcription"));

        let failed = &snapshot.chunks[1];
        assert_eq!(failed.status, ChunkStatus::Failed);
        assert_eq!(failed.attempt_count, 3);
        assert!(failed.last_error.as_deref().unwrap().contains("upstream 503"));

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_fatal_chunk_failure_stops_after_one_attempt() {
        let mut client = FakeClient::with_texts(&["Hello", "world", "end"]);
        client.fatal_failures.insert(0, "corrupt media segment");
        let manager = manager_with(client);

        let id = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.chunks[0].status, ChunkStatus::Failed);
        assert_eq!(snapshot.chunks[0].attempt_count, 1);

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_cancel_discards_late_chunk_results() {
        let gate = Arc::new(Notify::new());
        let mut client = FakeClient::with_texts(&["Hello", "world", "end"]);
        client.gate = Some(Arc::clone(&gate));
        let manager = manager_with(client);

        let id = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();

        // wait for chunks to be registered and in flight
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = manager.status(id).await.unwrap();
                if snapshot
                    .chunks
                    .iter()
                    .any(|c| c.status == ChunkStatus::InFlight)
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("chunks never went in flight");

        manager.cancel(id).await.unwrap();
        let snapshot = manager.status(id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);

        // release the blocked calls; their late results must be discarded
        for _ in 0..8 {
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = manager.status(id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(snapshot
            .chunks
            .iter()
            .all(|c| c.status != ChunkStatus::Succeeded));
        assert!(snapshot.transcript.is_none());

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_task_creation() {
        let manager = manager_with(FakeClient::default());
        assert!(manager.submit("", None).await.is_err());
        assert!(manager.submit("not-a-url", None).await.is_err());
        assert!(manager.submit("ftp://example.com/a.mp4", None).await.is_err());
        assert!(manager
            .submit("https://example.com/a.mp4", Some(0))
            .await
            .is_err());
        assert!(manager.list().await.is_empty());
        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_duplicate_live_url_rejected() {
        let gate = Arc::new(Notify::new());
        let mut client = FakeClient::with_texts(&["a", "b", "c"]);
        client.gate = Some(Arc::clone(&gate));
        let manager = manager_with(client);

        let first = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();
        assert!(manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .is_err());
        // a different URL is fine
        manager
            .submit("https://example.com/b.mp4", Some(300))
            .await
            .unwrap();

        manager.cancel(first).await.unwrap();
        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_zero_chunks_fails_task_without_chunk_jobs() {
        let manager = Manager::new(
            test_config(),
            Arc::new(FakeFetcher { duration_secs: 0.0 }),
            Arc::new(FakeSegmenter),
            Arc::new(FakeClient::default()),
        );

        let id = manager
            .submit("https://example.com/empty.mp4", Some(300))
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error.as_deref().unwrap().contains("no chunks"));
        assert!(snapshot.chunks.is_empty());

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_fatal_fetch_fails_task_without_retry() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(FetchError::fatal("404 not found")));

        let manager = Manager::new(
            test_config(),
            Arc::new(fetcher),
            Arc::new(FakeSegmenter),
            Arc::new(FakeClient::default()),
        );

        let id = manager
            .submit("https://example.com/missing.mp4", None)
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error.as_deref().unwrap().contains("404"));

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_transient_fetch_retried_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut fetcher = MockFetcher::new();
        let counter = Arc::clone(&attempts);
        fetcher.expect_fetch().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FetchError::transient("connection reset"))
            } else {
                Ok(AudioSource {
                    handle: MediaHandle::new("/tmp/fake-audio.mp3"),
                    duration_secs: Some(300.0),
                    title: None,
                })
            }
        });

        let manager = Manager::new(
            test_config(),
            Arc::new(fetcher),
            Arc::new(FakeSegmenter),
            Arc::new(FakeClient::with_texts(&["only"])),
        );

        let id = manager
            .submit("https://example.com/flaky.mp4", None)
            .await
            .unwrap();
        let snapshot = wait_terminal(&manager, id).await;
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.transcript.as_deref(), Some("only"));

        manager.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting_work() {
        let manager = manager_with(FakeClient::with_texts(&["a", "b", "c"]));
        let id = manager
            .submit("https://example.com/a.mp4", Some(300))
            .await
            .unwrap();
        wait_terminal(&manager, id).await;

        manager.shutdown(Duration::from_millis(200)).await;
        assert!(manager
            .submit("https://example.com/b.mp4", Some(300))
            .await
            .is_err());
        // records survive shutdown, and shutting down twice is harmless
        assert!(manager.status(id).await.is_ok());
        manager.shutdown(Duration::from_millis(200)).await;
    }
}
