//! Persisted output artifacts: the merged transcript text and a structured
//! manifest recording per-chunk outcomes, suitable for a later resume.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::task::{ChunkSnapshot, TaskId, TaskSnapshot, TaskStatus};
use crate::utils::sanitize_filename;

/// On-disk record of a finished task.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskManifest {
    pub task_id: TaskId,
    pub source_url: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub chunks: Vec<ChunkSnapshot>,
    pub transcript_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
}

/// Paths of the artifacts produced for one task.
#[derive(Debug)]
pub struct ArtifactPaths {
    pub manifest: PathBuf,
    pub transcript: Option<PathBuf>,
}

/// Write the transcript (if any) and the manifest for a terminal task.
pub async fn write_artifacts(dir: &Path, snapshot: &TaskSnapshot) -> Result<ArtifactPaths> {
    fs_err::create_dir_all(dir).context("Failed to create output directory")?;

    let mut base = sanitize_filename(&snapshot.source_url);
    base.truncate(48);
    let base = format!("{}_{}", base, Utc::now().format("%Y%m%d_%H%M%S"));

    let transcript = match &snapshot.transcript {
        Some(text) => {
            let path = dir.join(format!("{base}.txt"));
            fs_err::write(&path, text).context("Failed to write transcript")?;
            Some(path)
        }
        None => None,
    };

    let manifest = TaskManifest {
        task_id: snapshot.id,
        source_url: snapshot.source_url.clone(),
        status: snapshot.status,
        progress: snapshot.progress,
        error: snapshot.error.clone(),
        chunks: snapshot.chunks.clone(),
        transcript_file: transcript
            .as_ref()
            .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned()),
        created_at: snapshot.created_at,
        written_at: Utc::now(),
    };

    let manifest_path = dir.join(format!("{base}.manifest.json"));
    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    fs_err::write(&manifest_path, json).context("Failed to write manifest")?;

    tracing::info!(
        manifest = %manifest_path.display(),
        "output artifacts written"
    );
    Ok(ArtifactPaths {
        manifest: manifest_path,
        transcript,
    })
}

/// Read every task manifest under `dir`, oldest first. Backs the CLI's
/// status view over previously finished tasks.
pub async fn read_manifests(dir: &Path) -> Result<Vec<TaskManifest>> {
    let mut manifests = Vec::new();
    for entry in fs_err::read_dir(dir).context("Failed to read output directory")? {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".manifest.json"))
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }
        let json = fs_err::read_to_string(&path)?;
        let manifest: TaskManifest = serde_json::from_str(&json)
            .with_context(|| format!("Malformed manifest {}", path.display()))?;
        manifests.push(manifest);
    }
    manifests.sort_by_key(|m| m.written_at);
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ChunkStatus;

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            id: crate::task::TaskId::new(),
            source_url: "https://example.com/a.mp4".to_string(),
            status: TaskStatus::Completed,
            chunk_duration_secs: 300,
            progress: 1.0,
            chunks: vec![ChunkSnapshot {
                index: 0,
                status: ChunkStatus::Succeeded,
                duration_secs: 300.0,
                attempt_count: 1,
                last_error: None,
            }],
            transcript: Some("Hello world end".to_string()),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_artifacts_written_and_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifacts(dir.path(), &snapshot()).await.unwrap();

        let transcript = fs_err::read_to_string(paths.transcript.unwrap()).unwrap();
        assert_eq!(transcript, "Hello world end");

        let manifest: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(&paths.manifest).unwrap()).unwrap();
        assert_eq!(manifest["status"], "Completed");
        assert_eq!(manifest["progress"], 1.0);
        assert_eq!(manifest["chunks"][0]["attempt_count"], 1);
        assert!(manifest["transcript_file"].is_string());
    }

    #[tokio::test]
    async fn test_failed_task_manifest_without_transcript() {
        let mut snap = snapshot();
        snap.status = TaskStatus::Failed;
        snap.transcript = None;
        snap.error = Some("1 chunk(s) failed transcription".to_string());

        let dir = tempfile::tempdir().unwrap();
        let paths = write_artifacts(dir.path(), &snap).await.unwrap();
        assert!(paths.transcript.is_none());

        let manifest: serde_json::Value =
            serde_json::from_str(&fs_err::read_to_string(&paths.manifest).unwrap()).unwrap();
        assert_eq!(manifest["status"], "Failed");
        assert!(manifest["transcript_file"].is_null());
    }

    #[tokio::test]
    async fn test_read_manifests_round_trips_written_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let completed = snapshot();
        let mut failed = snapshot();
        failed.source_url = "https://example.com/b.mp4".to_string();
        failed.status = TaskStatus::Failed;
        failed.transcript = None;
        failed.error = Some("1 chunk(s) failed transcription".to_string());

        write_artifacts(dir.path(), &completed).await.unwrap();
        write_artifacts(dir.path(), &failed).await.unwrap();
        // stray files are ignored
        fs_err::write(dir.path().join("notes.txt"), "unrelated").unwrap();

        let manifests = read_manifests(dir.path()).await.unwrap();
        assert_eq!(manifests.len(), 2);
        let by_id: Vec<TaskId> = manifests.iter().map(|m| m.task_id).collect();
        assert!(by_id.contains(&completed.id));
        assert!(by_id.contains(&failed.id));

        let read_failed = manifests
            .iter()
            .find(|m| m.task_id == failed.id)
            .unwrap();
        assert_eq!(read_failed.status, TaskStatus::Failed);
        assert_eq!(
            read_failed.error.as_deref(),
            Some("1 chunk(s) failed transcription")
        );
        assert_eq!(read_failed.chunks[0].duration_secs, 300.0);
    }

    #[tokio::test]
    async fn test_read_manifests_from_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(read_manifests(&missing).await.is_err());
    }
}
