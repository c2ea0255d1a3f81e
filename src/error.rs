//! Error taxonomy for the transcription pipeline.
//!
//! Chunk-level failures are absorbed into chunk state and never crash a
//! worker; task-level fatal failures mark the task `Failed` with a recorded
//! reason. Nothing here terminates the process.

use std::time::Duration;

use crate::task::{ChunkStatus, TaskId, TaskStatus};

/// Whether a failed external call is worth retrying.
///
/// Transient covers timeouts, throttling and server-side errors; fatal
/// covers bad input and permanent rejections where a retry cannot help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Fatal,
}

/// Bad input, rejected before any task is created. Never retried.
#[derive(Debug, thiserror::Error)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// Failure reported by the media fetcher.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }
}

/// Failure reported by the audio segmenter.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SplitError {
    pub kind: FailureKind,
    pub message: String,
}

impl SplitError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }
}

/// Failure reported by the transcription service for a single chunk.
///
/// A rate-limit response may carry a `retry_after` hint which overrides the
/// retry policy's computed backoff.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TranscriptionError {
    pub kind: FailureKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl TranscriptionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            retry_after,
        }
    }
}

/// Merge should be impossible to fail under correct chunk bookkeeping; these
/// variants surface invariant violations rather than swallowing them.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("no chunks registered")]
    NoChunks,

    #[error("chunk {index} is still {status:?} at merge time")]
    ChunkNotTerminal { index: usize, status: ChunkStatus },

    #[error("chunk {index} succeeded without a transcript")]
    MissingTranscript { index: usize },
}

/// Errors from the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such task: {0}")]
    TaskNotFound(TaskId),

    #[error("a task for {0} is already in progress")]
    DuplicateLiveUrl(String),

    #[error("chunks already registered for task {0}")]
    ChunksAlreadyRegistered(TaskId),

    #[error("task {task} has no chunk {index}")]
    ChunkNotFound { task: TaskId, index: usize },

    #[error("segment manifest for task {0} has non-contiguous indices")]
    BadChunkManifest(TaskId),

    #[error("invalid status transition {from} -> {to} for task {task}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}
