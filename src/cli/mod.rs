use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chunkscribe",
    about = "Chunkscribe - Transcribe long media by splitting it into chunks and fanning them out to a speech-to-text API",
    version,
    long_about = "A CLI tool that downloads a media URL, splits the audio into fixed-duration chunks with ffmpeg, transcribes the chunks concurrently through a rate-limited worker pool, and merges the results into a single transcript."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe media from a URL
    Transcribe {
        /// HTTP(S) URL of the media to transcribe
        #[arg(value_name = "URL")]
        url: String,

        /// Chunk duration in seconds (overrides the configured default)
        #[arg(short, long, value_name = "SECONDS")]
        chunk_duration: Option<u64>,

        /// Directory for the transcript and manifest (prints to console if not specified)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Number of concurrent workers (overrides the configured default)
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Language hint for the transcription API (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,
    },

    /// List finished tasks recorded in the output directory
    Status {
        /// Directory holding task manifests (defaults to the configured output dir)
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Show or initialize configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
