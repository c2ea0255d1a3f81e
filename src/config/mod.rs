use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    pub workers: WorkerConfig,

    /// Audio chunking settings
    pub chunking: ChunkingConfig,

    /// API rate limiter settings
    pub limiter: LimiterConfig,

    /// Retry and backoff settings
    pub retry: RetryConfig,

    /// Transcription API settings
    pub api: ApiConfig,

    /// Output artifact settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent pipeline workers
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target duration of each audio chunk in seconds
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum burst of API calls; also the per-window call budget
    pub capacity: u32,

    /// Sustained call rate per second (capacity / rate sets the window)
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum transcription attempts per chunk
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,

    /// Attempts for the task-level download and split stages
    pub task_stage_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Transcription endpoint URL
    pub url: String,

    /// Model name sent with each request
    pub model: String,

    /// Language hint (auto-detect if not specified)
    pub language: Option<String>,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for merged transcripts and manifests
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: WorkerConfig { count: 4 },
            chunking: ChunkingConfig { duration_secs: 300 },
            limiter: LimiterConfig {
                capacity: 5,
                refill_per_sec: 1.0,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                task_stage_attempts: 2,
            },
            api: ApiConfig {
                url: "https://api.groq.com/openai/v1/audio/transcriptions".to_string(),
                model: "whisper-large-v3".to_string(),
                language: None,
                timeout_secs: 300,
            },
            output: OutputConfig { dir: None },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content =
                fs_err::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("chunkscribe").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers.count == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        if self.chunking.duration_secs == 0 {
            anyhow::bail!("Chunk duration must be positive");
        }
        if self.limiter.capacity == 0 {
            anyhow::bail!("Rate limiter capacity must be at least 1");
        }
        if self.limiter.refill_per_sec <= 0.0 {
            anyhow::bail!("Rate limiter refill rate must be positive");
        }
        if self.retry.max_attempts == 0 || self.retry.task_stage_attempts == 0 {
            anyhow::bail!("Retry attempt counts must be at least 1");
        }
        if self.api.url.is_empty() {
            anyhow::bail!("Transcription API URL must be configured");
        }
        Ok(())
    }

    /// API key from the environment; never stored in the config file.
    pub fn api_key(&self) -> Result<String> {
        std::env::var("TRANSCRIPTION_API_KEY")
            .context("TRANSCRIPTION_API_KEY environment variable is not set")
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Workers: {}", self.workers.count);
        println!("  Chunk Duration: {}s", self.chunking.duration_secs);
        println!(
            "  Rate Limit: capacity {} / {} calls/s",
            self.limiter.capacity, self.limiter.refill_per_sec
        );
        println!(
            "  Retry: {} attempts, base {}ms, max {}ms",
            self.retry.max_attempts, self.retry.base_delay_ms, self.retry.max_delay_ms
        );
        println!("  API URL: {}", self.api.url);
        println!("  API Model: {}", self.api.model);
        if let Some(dir) = &self.output.dir {
            println!("  Output Dir: {}", dir.display());
        }
    }
}
