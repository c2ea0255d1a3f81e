use url::Url;

use crate::error::ValidationError;

/// Validate a URL and return the normalized form. Rejects empty input and
/// anything that is not http(s) before a task can be created.
pub fn validate_and_normalize_url(url: &str) -> Result<String, ValidationError> {
    if url.trim().is_empty() {
        return Err(ValidationError("URL must not be empty".to_string()));
    }

    let parsed =
        Url::parse(url).map_err(|_| ValidationError(format!("Invalid URL format: {url}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError(
            "URL must use HTTP or HTTPS protocol".to_string(),
        ));
    }

    Ok(parsed.to_string())
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required for audio segmentation".to_string());
    }

    if !check_command_available("ffprobe").await {
        missing.push("ffprobe - required for media duration probing".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("-version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
