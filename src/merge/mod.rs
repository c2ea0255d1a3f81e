//! Assembles completed chunk transcripts into one ordered document.
//!
//! Output contract: chunk texts joined in ascending `index` order with a
//! single space between chunks; a chunk that failed after exhausting its
//! retries contributes the literal [`GAP_MARKER`] at its position, so the
//! partial work is preserved rather than discarded.

use crate::error::MergeError;
use crate::task::{Chunk, ChunkStatus};

/// Boundary inserted between adjacent chunk transcripts.
pub const CHUNK_SEPARATOR: &str = " ";

/// Placeholder emitted at the position of a failed chunk.
pub const GAP_MARKER: &str = "[inaudible]";

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub transcript: String,
    pub failed_chunks: Vec<usize>,
}

impl MergeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkMerger;

impl ChunkMerger {
    /// Merge all chunk transcripts. Every chunk must already be terminal;
    /// anything else is a bookkeeping invariant violation.
    pub fn merge(&self, chunks: &[Chunk]) -> Result<MergeOutcome, MergeError> {
        if chunks.is_empty() {
            return Err(MergeError::NoChunks);
        }

        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.index);

        let mut pieces = Vec::with_capacity(ordered.len());
        let mut failed_chunks = Vec::new();
        for chunk in ordered {
            match chunk.status {
                ChunkStatus::Succeeded => {
                    let text = chunk.transcript_text.as_deref().ok_or(
                        MergeError::MissingTranscript { index: chunk.index },
                    )?;
                    pieces.push(text);
                }
                ChunkStatus::Failed => {
                    failed_chunks.push(chunk.index);
                    pieces.push(GAP_MARKER);
                }
                status => {
                    return Err(MergeError::ChunkNotTerminal {
                        index: chunk.index,
                        status,
                    })
                }
            }
        }

        Ok(MergeOutcome {
            transcript: pieces.join(CHUNK_SEPARATOR),
            failed_chunks,
        })
    }
}
