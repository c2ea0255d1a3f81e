//! Chunkscribe - chunked media transcription with a rate-limited worker pool
//!
//! This library downloads media from a URL, splits its audio into
//! fixed-duration chunks, transcribes the chunks concurrently against a
//! speech-to-text API, and merges the per-chunk results back into a single
//! transcript in source order. Failed chunks never lose the rest of the
//! transcript; they appear as gap markers in the merged output.

pub mod cli;
pub mod config;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod media;
pub mod merge;
pub mod output;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use manager::Manager;
pub use task::{TaskId, TaskSnapshot, TaskStatus};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
