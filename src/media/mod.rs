//! Collaborator contracts at the pipeline boundary: fetching media,
//! segmenting audio, and calling the remote transcription service.
//!
//! The core only ever talks to these traits; concrete adapters live in
//! [`http`] and [`ffmpeg`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{FetchError, SplitError, TranscriptionError};

pub mod ffmpeg;
pub mod http;

/// Handle to a media file on disk. Cheap to clone; the producer of the file
/// (fetcher or segmenter) owns the underlying bytes.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    path: Arc<PathBuf>,
}

impl MediaHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fetched audio plus whatever metadata the fetcher could determine.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub handle: MediaHandle,
    pub duration_secs: Option<f64>,
    pub title: Option<String>,
}

/// One entry in the segmenter's ordered manifest.
#[derive(Debug, Clone)]
pub struct SegmentRef {
    pub index: usize,
    pub handle: MediaHandle,
    pub duration_secs: f64,
}

/// Retrieves a remote media URL into a local audio file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<AudioSource, FetchError>;
}

/// Splits local audio into fixed-duration segments, returning them in
/// timeline order with zero-based contiguous indices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn split(
        &self,
        source: &AudioSource,
        chunk_duration_secs: u64,
    ) -> Result<Vec<SegmentRef>, SplitError>;
}

/// Client for the remote speech-to-text service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, chunk: &MediaHandle) -> Result<String, TranscriptionError>;
}
