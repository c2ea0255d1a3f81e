//! ffmpeg-based audio segmentation.
//!
//! Probes duration with ffprobe, then cuts the audio into fixed-duration
//! 16 kHz mono mp3 segments with ffmpeg's segment muxer. Segment files live
//! under a per-invocation subdirectory of the working directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

use super::{AudioSource, MediaHandle, SegmentRef, Segmenter};
use crate::error::SplitError;

pub struct FfmpegSegmenter {
    work_dir: PathBuf,
}

impl FfmpegSegmenter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    async fn split(
        &self,
        source: &AudioSource,
        chunk_duration_secs: u64,
    ) -> Result<Vec<SegmentRef>, SplitError> {
        let total_secs = match source.duration_secs {
            Some(d) => d,
            None => probe_duration(source.handle.path()).await?,
        };
        if total_secs <= 0.0 {
            return Err(SplitError::fatal("audio has zero duration"));
        }

        let chunk_secs = chunk_duration_secs as f64;
        let count = (total_secs / chunk_secs).ceil() as usize;

        let out_dir = self
            .work_dir
            .join(format!("chunks_{}", &Uuid::new_v4().to_string()[..8]));
        fs_err::create_dir_all(&out_dir)
            .map_err(|e| SplitError::fatal(format!("cannot create chunk directory: {e}")))?;

        let pattern = out_dir.join("segment_%04d.mp3");
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(source.handle.path())
            .arg("-vn")
            .arg("-acodec")
            .arg("libmp3lame")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg("-f")
            .arg("segment")
            .arg("-segment_time")
            .arg(chunk_duration_secs.to_string())
            .arg("-reset_timestamps")
            .arg("1")
            .arg(&pattern)
            .output()
            .await
            .map_err(|e| SplitError::fatal(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SplitError::fatal(format!("ffmpeg failed: {stderr}")));
        }

        let mut segments = Vec::with_capacity(count);
        for index in 0..count {
            let path = out_dir.join(format!("segment_{index:04}.mp3"));
            if !path.exists() {
                return Err(SplitError::fatal(format!(
                    "ffmpeg did not produce expected segment {index}"
                )));
            }
            let duration = chunk_secs.min(total_secs - index as f64 * chunk_secs);
            segments.push(SegmentRef {
                index,
                handle: MediaHandle::new(path),
                duration_secs: duration,
            });
        }

        tracing::info!(
            segments = segments.len(),
            total_secs,
            "audio split into segments"
        );
        Ok(segments)
    }
}

/// Duration in seconds as reported by ffprobe.
async fn probe_duration(path: &Path) -> Result<f64, SplitError> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output()
        .await
        .map_err(|e| SplitError::fatal(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SplitError::fatal(format!("ffprobe failed: {stderr}")));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    raw.trim()
        .parse::<f64>()
        .map_err(|_| SplitError::fatal(format!("cannot parse media duration: {raw:?}")))
}
