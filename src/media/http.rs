//! HTTP adapters: streaming media download and the transcription API client.
//!
//! The transcription client targets an OpenAI-compatible
//! `audio/transcriptions` endpoint (multipart upload, bearer auth, JSON
//! response with a `text` field).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::{AudioSource, Fetcher, MediaHandle, TranscriptionClient};
use crate::config::ApiConfig;
use crate::error::{FetchError, TranscriptionError};

/// Downloads media over HTTP into a working directory.
pub struct HttpFetcher {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            download_dir: download_dir.into(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<AudioSource, FetchError> {
        tracing::info!(url, "downloading media");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                FetchError::transient(format!("download request failed: {e}"))
            } else {
                FetchError::fatal(format!("download request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("download failed: HTTP {status}");
            return Err(if is_transient_status(status) {
                FetchError::transient(message)
            } else {
                FetchError::fatal(message)
            });
        }

        let filename = format!("media_{}.bin", &Uuid::new_v4().to_string()[..8]);
        let path = self.download_dir.join(filename);
        let mut file = fs_err::File::create(&path)
            .map_err(|e| FetchError::fatal(format!("cannot create download file: {e}")))?;

        let mut stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| FetchError::transient(format!("download interrupted: {e}")))?;
            file.write_all(&chunk)
                .map_err(|e| FetchError::fatal(format!("cannot write download: {e}")))?;
        }

        tracing::info!(url, path = %path.display(), "download complete");
        Ok(AudioSource {
            handle: MediaHandle::new(path),
            duration_secs: None,
            title: None,
        })
    }
}

/// Multipart client for the remote transcription API.
pub struct ApiTranscriptionClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl ApiTranscriptionClient {
    pub fn new(config: &ApiConfig, api_key: String) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.url.clone(),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl TranscriptionClient for ApiTranscriptionClient {
    async fn transcribe(&self, chunk: &MediaHandle) -> Result<String, TranscriptionError> {
        let bytes = fs_err::read(chunk.path())
            .map_err(|e| TranscriptionError::fatal(format!("cannot read segment: {e}")))?;
        let file_name = chunk
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "segment.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| TranscriptionError::fatal(format!("invalid upload part: {e}")))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("temperature", "0");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriptionError::transient(format!("API call timed out: {e}"))
                } else {
                    TranscriptionError::transient(format!("API request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = format!("API request failed with status {status}: {body}");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                TranscriptionError::rate_limited(message, retry_after)
            } else if is_transient_status(status) {
                TranscriptionError::transient(message)
            } else {
                TranscriptionError::fatal(message)
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::fatal(format!("malformed API response: {e}")))?;
        Ok(parsed.text)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
