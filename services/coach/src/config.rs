//! Application Configuration Module
//!
//! Settings for the coach service, read from environment variables (and a
//! `.env` file when present).

use coach_core::synthesizer::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT};
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub api_key: Option<SecretString>,
    pub endpoint: String,
    pub chat_model: String,
    pub feedback_timeout: Duration,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub prompts_dir: PathBuf,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("FEEDBACK_TIMEOUT_SECS must be a positive number of seconds, got {0:?}")]
    InvalidTimeout(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `FEEDBACK_API_KEY`: Key for the feedback model. Falls back to `GEMINI_API_KEY`.
    //     Without either, reports are produced without coach feedback.
    // *   `FEEDBACK_ENDPOINT`: (Optional) OpenAI-compatible chat completions URL.
    // *   `CHAT_MODEL`: (Optional) Model name. Defaults to "gemini-2.0-flash".
    // *   `FEEDBACK_TIMEOUT_SECS`: (Optional) Model call timeout. Defaults to 60.
    // *   `FFMPEG_PATH` / `FFPROBE_PATH`: (Optional) Decoder binaries.
    // *   `PROMPTS_DIR`: (Optional) Directory holding `feedback.md`. Defaults to "prompts".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_blank("FEEDBACK_API_KEY")
            .or_else(|| non_blank("GEMINI_API_KEY"))
            .map(SecretString::from);

        let endpoint =
            non_blank("FEEDBACK_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let chat_model = non_blank("CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let feedback_timeout = match non_blank("FEEDBACK_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidTimeout(raw)),
            },
            None => DEFAULT_TIMEOUT,
        };

        let ffmpeg_path =
            PathBuf::from(non_blank("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()));
        let ffprobe_path =
            PathBuf::from(non_blank("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()));
        let prompts_dir =
            PathBuf::from(non_blank("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string()));

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = non_blank("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            endpoint,
            chat_model,
            feedback_timeout,
            ffmpeg_path,
            ffprobe_path,
            prompts_dir,
            log_level,
        })
    }
}
