//! Task and chunk data model.
//!
//! A [`Task`] is one end-to-end transcription job for a single source URL.
//! Once the segmenter's manifest is registered, the task owns an ordered
//! sequence of [`Chunk`]s whose `index` is the position in the original audio
//! timeline. Chunk insertion order is set once and never changes; only chunk
//! *statuses* move after registration.
//!
//! Status transitions are forward-only through the pipeline sequence.
//! `Failed` and `Cancelled` are reachable from any non-terminal state, and
//! all three terminal states are absorbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::media::MediaHandle;

/// Opaque task identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Splitting,
    Transcribing,
    Merging,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Position in the forward pipeline order. `Failed`/`Cancelled` sit
    /// outside the sequence.
    fn rank(self) -> Option<u8> {
        match self {
            TaskStatus::Pending => Some(0),
            TaskStatus::Downloading => Some(1),
            TaskStatus::Splitting => Some(2),
            TaskStatus::Transcribing => Some(3),
            TaskStatus::Merging => Some(4),
            TaskStatus::Completed => Some(5),
            TaskStatus::Failed | TaskStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskStatus::Failed | TaskStatus::Cancelled => true,
            _ => match (self.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Downloading => "Downloading",
            TaskStatus::Splitting => "Splitting",
            TaskStatus::Transcribing => "Transcribing",
            TaskStatus::Merging => "Merging",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        };
        write!(f, "{name}")
    }
}

/// State of one audio chunk within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Succeeded | ChunkStatus::Failed)
    }
}

/// One time-ordered audio segment of a task, transcribed independently.
///
/// Holds a handle to the segment's media, not the bytes themselves; the
/// segmenter's output owns the underlying file.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub media_ref: MediaHandle,
    pub duration_secs: f64,
    pub status: ChunkStatus,
    pub attempt_count: u32,
    pub transcript_text: Option<String>,
    pub last_error: Option<String>,
}

impl Chunk {
    pub(crate) fn new(index: usize, media_ref: MediaHandle, duration_secs: f64) -> Self {
        Self {
            index,
            media_ref,
            duration_secs,
            status: ChunkStatus::Pending,
            attempt_count: 0,
            transcript_text: None,
            last_error: None,
        }
    }
}

/// One end-to-end transcription job. Exclusively owned by the task store;
/// everything else sees read-only [`TaskSnapshot`]s.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub source_url: String,
    pub status: TaskStatus,
    pub chunk_duration_secs: u64,
    pub chunks: Vec<Chunk>,
    pub chunks_registered: bool,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(source_url: &str, chunk_duration_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            source_url: source_url.to_string(),
            status: TaskStatus::Pending,
            chunk_duration_secs,
            chunks: Vec::new(),
            chunks_registered: false,
            transcript: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fraction of chunks that reached a terminal status, 0.0 until the
    /// segmenter's manifest is registered.
    pub fn progress(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let terminal = self
            .chunks
            .iter()
            .filter(|c| c.status.is_terminal())
            .count();
        terminal as f64 / self.chunks.len() as f64
    }

    pub fn all_chunks_terminal(&self) -> bool {
        self.chunks_registered
            && !self.chunks.is_empty()
            && self.chunks.iter().all(|c| c.status.is_terminal())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            status: self.status,
            chunk_duration_secs: self.chunk_duration_secs,
            progress: self.progress(),
            chunks: self.chunks.iter().map(ChunkSnapshot::from).collect(),
            transcript: self.transcript.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of one chunk, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub index: usize,
    pub status: ChunkStatus,
    pub duration_secs: f64,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl From<&Chunk> for ChunkSnapshot {
    fn from(chunk: &Chunk) -> Self {
        Self {
            index: chunk.index,
            status: chunk.status,
            duration_secs: chunk.duration_secs,
            attempt_count: chunk.attempt_count,
            last_error: chunk.last_error.clone(),
        }
    }
}

/// Read-only view of a task as returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub source_url: String,
    pub status: TaskStatus,
    pub chunk_duration_secs: u64,
    pub progress: f64,
    pub chunks: Vec<ChunkSnapshot>,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
