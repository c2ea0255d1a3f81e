//! Thread-safe registry of tasks and their chunks; the single source of
//! truth for status and progress.
//!
//! Layout: an outer read/write lock over the task map, and one mutex per
//! task. Mutations on the same task serialize on its mutex; different tasks
//! never block each other beyond the brief map lookup. All derived values
//! (progress, "all chunks terminal") are computed while the task's mutex is
//! held, so concurrent chunk updates can never produce an inconsistent
//! count.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::media::{MediaHandle, SegmentRef};
use crate::merge::MergeOutcome;
use crate::task::{Chunk, ChunkStatus, Task, TaskId, TaskSnapshot, TaskStatus};

/// Result of a single chunk transcription attempt.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    Succeeded(String),
    Failed(String),
}

/// What happened when a chunk result was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRecord {
    /// The update was applied. `all_terminal` is true exactly when this
    /// update made the last remaining chunk terminal.
    Applied { all_terminal: bool },
    /// The task was already terminal (cancelled or failed); the late result
    /// was discarded without touching any state.
    Discarded,
}

#[derive(Default)]
struct Inner {
    map: HashMap<TaskId, Arc<Mutex<Task>>>,
    order: Vec<TaskId>,
}

#[derive(Default)]
pub struct TaskStore {
    inner: RwLock<Inner>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, source_url: &str, chunk_duration_secs: u64) -> TaskId {
        let task = Task::new(source_url, chunk_duration_secs);
        let id = task.id;
        let mut inner = self.inner.write().await;
        inner.map.insert(id, Arc::new(Mutex::new(task)));
        inner.order.push(id);
        id
    }

    /// Create a task unless a live (non-terminal) task for the same URL
    /// already exists. The check and the insert happen under one write
    /// lock, so two racing submissions of the same URL cannot both win.
    pub async fn create_unless_live(
        &self,
        source_url: &str,
        chunk_duration_secs: u64,
    ) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.write().await;
        for id in &inner.order {
            if let Some(entry) = inner.map.get(id) {
                let task = entry.lock().await;
                if task.source_url == source_url && !task.status.is_terminal() {
                    return Err(StoreError::DuplicateLiveUrl(source_url.to_string()));
                }
            }
        }
        let task = Task::new(source_url, chunk_duration_secs);
        let id = task.id;
        inner.map.insert(id, Arc::new(Mutex::new(task)));
        inner.order.push(id);
        Ok(id)
    }

    async fn entry(&self, id: TaskId) -> Result<Arc<Mutex<Task>>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .map
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    pub async fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot, StoreError> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.snapshot())
    }

    /// Snapshots of all tasks in creation order.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let entries: Vec<Arc<Mutex<Task>>> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|id| inner.map.get(id).cloned())
                .collect()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.lock().await.snapshot());
        }
        snapshots
    }

    /// Apply a task status transition, rejecting anything the state machine
    /// forbids. On rejection the task is left untouched.
    pub async fn transition(&self, id: TaskId, next: TaskStatus) -> Result<(), StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if !task.status.can_transition(next) {
            return Err(StoreError::InvalidTransition {
                task: id,
                from: task.status,
                to: next,
            });
        }
        tracing::debug!(task = %id, from = %task.status, to = %next, "task transition");
        task.status = next;
        task.touch();
        Ok(())
    }

    /// Mark the task failed with a reason. No-op if already terminal.
    pub async fn fail(&self, id: TaskId, reason: String) -> Result<(), StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Ok(());
        }
        tracing::warn!(task = %id, reason = %reason, "task failed");
        task.status = TaskStatus::Failed;
        task.error = Some(reason);
        task.touch();
        Ok(())
    }

    /// Cancel the task. Returns true if the task was live and is now
    /// cancelled, false if it had already reached a terminal state.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Ok(false);
        }
        task.status = TaskStatus::Cancelled;
        task.touch();
        Ok(true)
    }

    /// Register the segmenter's ordered manifest. Fails if called twice for
    /// the same task; indices must be contiguous from zero.
    pub async fn register_chunks(
        &self,
        id: TaskId,
        mut segments: Vec<SegmentRef>,
    ) -> Result<usize, StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.chunks_registered {
            return Err(StoreError::ChunksAlreadyRegistered(id));
        }
        segments.sort_by_key(|s| s.index);
        for (position, segment) in segments.iter().enumerate() {
            if segment.index != position {
                return Err(StoreError::BadChunkManifest(id));
            }
        }
        task.chunks = segments
            .into_iter()
            .map(|s| Chunk::new(s.index, s.handle, s.duration_secs))
            .collect();
        task.chunks_registered = true;
        task.touch();
        Ok(task.chunks.len())
    }

    /// Begin a transcription attempt on a chunk: mark it in flight, bump its
    /// attempt counter, and hand back the media reference. Returns `None`
    /// when the task is already terminal or the chunk is done, in which case
    /// the caller must abandon the job.
    pub async fn begin_chunk_attempt(
        &self,
        id: TaskId,
        index: usize,
    ) -> Result<Option<(MediaHandle, u32)>, StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Ok(None);
        }
        let chunk = task
            .chunks
            .get_mut(index)
            .ok_or(StoreError::ChunkNotFound { task: id, index })?;
        if chunk.status.is_terminal() {
            return Ok(None);
        }
        chunk.status = ChunkStatus::InFlight;
        chunk.attempt_count += 1;
        let result = (chunk.media_ref.clone(), chunk.attempt_count);
        task.touch();
        Ok(Some(result))
    }

    /// Record the terminal outcome of a chunk attempt. Late results for a
    /// terminal task are discarded, never applied. A chunk that already
    /// reached a terminal status is never overwritten.
    pub async fn record_chunk_result(
        &self,
        id: TaskId,
        index: usize,
        outcome: ChunkOutcome,
    ) -> Result<ChunkRecord, StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Ok(ChunkRecord::Discarded);
        }
        let chunk = task
            .chunks
            .get_mut(index)
            .ok_or(StoreError::ChunkNotFound { task: id, index })?;
        if chunk.status.is_terminal() {
            return Ok(ChunkRecord::Discarded);
        }
        match outcome {
            ChunkOutcome::Succeeded(text) => {
                chunk.status = ChunkStatus::Succeeded;
                chunk.transcript_text = Some(text);
            }
            ChunkOutcome::Failed(error) => {
                chunk.status = ChunkStatus::Failed;
                chunk.last_error = Some(error);
            }
        }
        let all_terminal = task.all_chunks_terminal();
        task.touch();
        Ok(ChunkRecord::Applied { all_terminal })
    }

    /// Chunk state as input for the merger.
    pub async fn chunks_for_merge(&self, id: TaskId) -> Result<Vec<Chunk>, StoreError> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.chunks.clone())
    }

    /// Store the merge result and move the task to its terminal state.
    /// Idempotent: a task that is already terminal keeps its existing
    /// result and this call returns the current snapshot unchanged.
    pub async fn complete_merge(
        &self,
        id: TaskId,
        outcome: MergeOutcome,
    ) -> Result<TaskSnapshot, StoreError> {
        let entry = self.entry(id).await?;
        let mut task = entry.lock().await;
        if task.status.is_terminal() {
            return Ok(task.snapshot());
        }
        task.transcript = Some(outcome.transcript);
        if outcome.failed_chunks.is_empty() {
            task.status = TaskStatus::Completed;
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(format!(
                "{} chunk(s) failed transcription",
                outcome.failed_chunks.len()
            ));
        }
        task.touch();
        Ok(task.snapshot())
    }
}
