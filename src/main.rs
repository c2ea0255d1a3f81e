use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chunkscribe::cli::{Cli, Commands};
use chunkscribe::config::Config;
use chunkscribe::manager::Manager;
use chunkscribe::media::ffmpeg::FfmpegSegmenter;
use chunkscribe::media::http::{ApiTranscriptionClient, HttpFetcher};
use chunkscribe::task::TaskStatus;
use chunkscribe::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "chunkscribe=debug"
    } else {
        "chunkscribe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let missing_deps = utils::check_dependencies().await;
    if !missing_deps.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing_deps {
            eprintln!("   • {}", dep);
        }
    }

    let mut config = Config::load().await?;

    match cli.command {
        Commands::Transcribe {
            url,
            chunk_duration,
            output,
            workers,
            language,
        } => {
            if let Some(workers) = workers {
                config.workers.count = workers;
            }
            if let Some(language) = language {
                config.api.language = Some(language);
            }
            if output.is_some() {
                config.output.dir = output.clone();
            }
            config.validate()?;

            let api_key = config.api_key()?;
            let work_dir = tempfile::tempdir()?;

            let fetcher = Arc::new(HttpFetcher::new(work_dir.path()));
            let segmenter = Arc::new(FfmpegSegmenter::new(work_dir.path()));
            let client = Arc::new(ApiTranscriptionClient::new(&config.api, api_key)?);

            let manager = Manager::new(config, fetcher, segmenter, client);
            let task_id = manager
                .submit(&url, chunk_duration)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;

            let progress = if cli.quiet {
                ProgressBar::hidden()
            } else {
                let bar = ProgressBar::new(100);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")?
                        .progress_chars("#>-"),
                );
                bar
            };

            let snapshot = loop {
                let snapshot = manager.status(task_id).await?;
                progress.set_position((snapshot.progress * 100.0) as u64);
                progress.set_message(snapshot.status.to_string());
                if snapshot.status.is_terminal() {
                    break snapshot;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            };
            progress.finish_and_clear();

            match snapshot.status {
                TaskStatus::Completed => {
                    if output.is_none() {
                        if let Some(transcript) = &snapshot.transcript {
                            println!("{transcript}");
                        }
                    } else {
                        println!("Transcript written to {}", output.unwrap().display());
                    }
                }
                TaskStatus::Failed => {
                    if let Some(transcript) = &snapshot.transcript {
                        eprintln!("Partial transcript:");
                        println!("{transcript}");
                    }
                    manager.shutdown(Duration::from_secs(10)).await;
                    anyhow::bail!(
                        "transcription failed: {}",
                        snapshot.error.as_deref().unwrap_or("unknown error")
                    );
                }
                other => {
                    manager.shutdown(Duration::from_secs(10)).await;
                    anyhow::bail!("task ended in unexpected state {other}");
                }
            }

            manager.shutdown(Duration::from_secs(10)).await;
        }
        Commands::Status { dir } => {
            let dir = dir.or_else(|| config.output.dir.clone()).ok_or_else(|| {
                anyhow::anyhow!("no output directory configured; pass --dir or set output.dir")
            })?;
            let manifests = chunkscribe::output::read_manifests(&dir).await?;
            if manifests.is_empty() {
                println!("No task manifests found in {}", dir.display());
            }
            for manifest in manifests {
                let total_secs: f64 = manifest.chunks.iter().map(|c| c.duration_secs).sum();
                let failed = manifest
                    .chunks
                    .iter()
                    .filter(|c| c.status == chunkscribe::task::ChunkStatus::Failed)
                    .count();
                println!(
                    "{}  {:<11} {:>3.0}%  {} chunk(s), {} failed, {}  {}",
                    manifest.task_id,
                    manifest.status.to_string(),
                    manifest.progress * 100.0,
                    manifest.chunks.len(),
                    failed,
                    utils::format_duration(total_secs),
                    manifest.source_url
                );
                if let Some(error) = &manifest.error {
                    println!("    error: {error}");
                }
            }
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Configuration written to default location");
            }
        }
    }

    Ok(())
}
