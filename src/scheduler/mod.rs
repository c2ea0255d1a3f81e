//! Worker pool and job scheduling.
//!
//! One pending-work queue carries heterogeneous job descriptors: task-stage
//! jobs (download + split) and per-chunk transcription jobs. A fixed pool of
//! workers pulls from the queue; a task-stage job that splits into N chunks
//! pushes N chunk jobs back onto the same queue, so large tasks interleave
//! with small ones instead of monopolizing workers.
//!
//! Chunk jobs complete in whatever order the API answers; ordering is only
//! enforced by the merge step. The worker whose chunk update turns the last
//! chunk terminal runs the merge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::limiter::RateLimiter;
use crate::media::{Fetcher, Segmenter, TranscriptionClient};
use crate::merge::ChunkMerger;
use crate::output;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{ChunkOutcome, ChunkRecord, TaskStore};
use crate::task::{TaskId, TaskStatus};

/// Unit of pending work on the shared queue.
#[derive(Debug, Clone)]
pub enum Job {
    /// Download and split one task, then fan out chunk jobs.
    TaskStage(TaskId),
    /// Transcribe one chunk of one task.
    ChunkTranscription { task: TaskId, index: usize },
}

/// Everything a worker needs, shared across the pool.
pub(crate) struct SchedulerContext {
    pub store: Arc<TaskStore>,
    pub limiter: Arc<RateLimiter>,
    pub chunk_retry: RetryPolicy,
    pub task_retry: RetryPolicy,
    pub merger: ChunkMerger,
    pub fetcher: Arc<dyn Fetcher>,
    pub segmenter: Arc<dyn Segmenter>,
    pub client: Arc<dyn TranscriptionClient>,
    pub queue: mpsc::UnboundedSender<Job>,
    pub api_timeout: Duration,
    pub output_dir: Option<PathBuf>,
}

pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Job>,
    shutdown: watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers draining the given queue. Must be called from
    /// within a tokio runtime.
    pub(crate) fn spawn(
        count: usize,
        ctx: Arc<SchedulerContext>,
        receiver: mpsc::UnboundedReceiver<Job>,
    ) -> Self {
        let queue = ctx.queue.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..count)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let receiver = Arc::clone(&receiver);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, ctx, receiver, shutdown))
            })
            .collect();

        Self {
            queue,
            shutdown: shutdown_tx,
            workers,
        }
    }

    pub fn submit(&self, job: Job) {
        // send only fails when all workers are gone, i.e. after shutdown
        if self.queue.send(job).is_err() {
            warn!("job submitted after worker pool shutdown; dropped");
        }
    }

    /// Signal workers to stop, wait up to `grace` for them to finish their
    /// current job, then abort stragglers.
    pub async fn shutdown(mut self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let deadline = tokio::time::Instant::now() + grace;
        for mut handle in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("worker did not stop within grace period; aborting");
                handle.abort();
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<SchedulerContext>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker = worker_id, "worker started");
    loop {
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            job = async { receiver.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        let result = match job {
            Job::TaskStage(task) => run_task_stage(&ctx, task, &mut shutdown).await,
            Job::ChunkTranscription { task, index } => {
                run_chunk_job(&ctx, task, index, &mut shutdown).await
            }
        };
        if let Err(err) = result {
            // store-level errors (task vanished etc.); never kills the worker
            error!(worker = worker_id, error = %err, "job failed");
        }
    }
    debug!(worker = worker_id, "worker exiting");
}

/// Download and split one task, then enqueue its chunk jobs.
async fn run_task_stage(
    ctx: &SchedulerContext,
    task_id: TaskId,
    shutdown: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    let snapshot = ctx.store.snapshot(task_id).await?;

    // a cancel between submit and pickup makes this transition fail
    if ctx
        .store
        .transition(task_id, TaskStatus::Downloading)
        .await
        .is_err()
    {
        debug!(task = %task_id, "skipping stage for terminal task");
        return Ok(());
    }
    info!(task = %task_id, url = %snapshot.source_url, "downloading");

    let mut attempt = 0u32;
    let source = loop {
        attempt += 1;
        match ctx.fetcher.fetch(&snapshot.source_url).await {
            Ok(source) => break source,
            Err(err) => {
                warn!(task = %task_id, attempt, error = %err, "download attempt failed");
                match ctx.task_retry.decide(err.kind, attempt, None) {
                    RetryDecision::RetryAfter(delay) => {
                        if wait_or_shutdown(delay, shutdown).await {
                            return Ok(());
                        }
                    }
                    RetryDecision::GiveUp => {
                        ctx.store
                            .fail(task_id, format!("download failed: {err}"))
                            .await?;
                        return Ok(());
                    }
                }
            }
        }
    };

    if ctx
        .store
        .transition(task_id, TaskStatus::Splitting)
        .await
        .is_err()
    {
        return Ok(());
    }
    info!(task = %task_id, "splitting audio");

    let mut attempt = 0u32;
    let segments = loop {
        attempt += 1;
        match ctx
            .segmenter
            .split(&source, snapshot.chunk_duration_secs)
            .await
        {
            Ok(segments) => break segments,
            Err(err) => {
                warn!(task = %task_id, attempt, error = %err, "split attempt failed");
                match ctx.task_retry.decide(err.kind, attempt, None) {
                    RetryDecision::RetryAfter(delay) => {
                        if wait_or_shutdown(delay, shutdown).await {
                            return Ok(());
                        }
                    }
                    RetryDecision::GiveUp => {
                        ctx.store
                            .fail(task_id, format!("split failed: {err}"))
                            .await?;
                        return Ok(());
                    }
                }
            }
        }
    };

    if segments.is_empty() {
        ctx.store
            .fail(task_id, "segmenter produced no chunks".to_string())
            .await?;
        return Ok(());
    }

    let count = match ctx.store.register_chunks(task_id, segments).await {
        Ok(count) => count,
        Err(err) => {
            ctx.store
                .fail(task_id, format!("chunk registration failed: {err}"))
                .await?;
            return Ok(());
        }
    };

    // short-circuit fan-out if the task was cancelled during the split
    if ctx
        .store
        .transition(task_id, TaskStatus::Transcribing)
        .await
        .is_err()
    {
        return Ok(());
    }

    for index in 0..count {
        let _ = ctx.queue.send(Job::ChunkTranscription {
            task: task_id,
            index,
        });
    }
    info!(task = %task_id, chunks = count, "queued chunk transcription jobs");
    Ok(())
}

/// Transcribe one chunk, retrying transient failures per the retry policy.
async fn run_chunk_job(
    ctx: &SchedulerContext,
    task_id: TaskId,
    index: usize,
    shutdown: &mut watch::Receiver<bool>,
) -> crate::Result<()> {
    loop {
        let Some((handle, attempt)) = ctx.store.begin_chunk_attempt(task_id, index).await? else {
            debug!(task = %task_id, chunk = index, "skipping chunk for terminal task");
            return Ok(());
        };

        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = ctx.limiter.acquire() => {}
        }
        debug!(task = %task_id, chunk = index, attempt, "transcribing chunk");

        let failure = match tokio::time::timeout(ctx.api_timeout, ctx.client.transcribe(&handle))
            .await
        {
            Ok(Ok(text)) => {
                apply_chunk_outcome(ctx, task_id, index, ChunkOutcome::Succeeded(text)).await?;
                return Ok(());
            }
            Ok(Err(err)) => err,
            Err(_) => crate::error::TranscriptionError::transient("transcription call timed out"),
        };

        warn!(
            task = %task_id,
            chunk = index,
            attempt,
            error = %failure,
            "chunk transcription attempt failed"
        );
        match ctx.chunk_retry.decide_for(&failure, attempt) {
            RetryDecision::RetryAfter(delay) => {
                if wait_or_shutdown(delay, shutdown).await {
                    return Ok(());
                }
            }
            RetryDecision::GiveUp => {
                apply_chunk_outcome(
                    ctx,
                    task_id,
                    index,
                    ChunkOutcome::Failed(failure.to_string()),
                )
                .await?;
                return Ok(());
            }
        }
    }
}

async fn apply_chunk_outcome(
    ctx: &SchedulerContext,
    task_id: TaskId,
    index: usize,
    outcome: ChunkOutcome,
) -> crate::Result<()> {
    match ctx.store.record_chunk_result(task_id, index, outcome).await? {
        ChunkRecord::Discarded => {
            debug!(task = %task_id, chunk = index, "late chunk result discarded");
        }
        ChunkRecord::Applied {
            all_terminal: false,
        } => {}
        ChunkRecord::Applied { all_terminal: true } => finish_task(ctx, task_id).await?,
    }
    Ok(())
}

/// Merge the finished task and persist artifacts. Runs exactly once per
/// task: only the update that turned the last chunk terminal reaches here.
async fn finish_task(ctx: &SchedulerContext, task_id: TaskId) -> crate::Result<()> {
    if ctx
        .store
        .transition(task_id, TaskStatus::Merging)
        .await
        .is_err()
    {
        return Ok(());
    }

    let chunks = ctx.store.chunks_for_merge(task_id).await?;
    match ctx.merger.merge(&chunks) {
        Ok(outcome) => {
            let snapshot = ctx.store.complete_merge(task_id, outcome).await?;
            info!(
                task = %task_id,
                status = %snapshot.status,
                progress = snapshot.progress,
                "task finished"
            );
            if let Some(dir) = &ctx.output_dir {
                if let Err(err) = output::write_artifacts(dir, &snapshot).await {
                    warn!(task = %task_id, error = %err, "failed to write output artifacts");
                }
            }
        }
        Err(err) => {
            error!(task = %task_id, error = %err, "merge invariant violation");
            ctx.store
                .fail(task_id, format!("merge failed: {err}"))
                .await?;
        }
    }
    Ok(())
}

/// Sleep for `delay`, returning true if shutdown fired first.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
