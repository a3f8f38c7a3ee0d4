//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: converts between Rust structs and TOML/env representations
//! - **derive macros**: generate Debug/Clone/Serialize/Deserialize
//! - **Result<T, E>**: configuration loading can fail and callers must handle it
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_JOBS_MAX_CONCURRENT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub audio: AudioConfig,
    pub jobs: JobsConfig,
    pub media: MediaConfig,
}

/// Server-specific settings.
///
/// - `host = "127.0.0.1"`: localhost only (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Recognition model settings.
///
/// `whisper_model` selects the Whisper variant ("tiny", "base", "small",
/// "medium", "large"); smaller models are faster and less accurate.
/// `language` is an ISO 639-1 hint passed to the decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub language: String,
}

/// Canonical audio format parameters.
///
/// The recognition engine accepts exactly this format; the normalizer
/// converts everything else into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Canonical sample rate in Hz (16000 for Whisper)
    pub sample_rate: u32,

    /// Longest audio a single job may submit to the engine, in seconds
    pub max_clip_seconds: u32,
}

/// Background job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum number of transcription jobs running at once; submissions
    /// beyond this queue and stay in `processing` until a slot frees up
    pub max_concurrent: usize,
}

/// Remote media retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Per-request timeout for fetching remote media, in seconds
    pub request_timeout_secs: u64,

    /// Upper bound on a downloaded media file, in bytes
    pub max_download_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                whisper_model: "tiny".to_string(), // small enough to load at startup
                language: "en".to_string(),
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                max_clip_seconds: 600, // 10 minutes of audio per job
            },
            jobs: JobsConfig { max_concurrent: 4 },
            media: MediaConfig {
                request_timeout_secs: 60,
                max_download_bytes: 512 * 1024 * 1024, // 512 MB
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: override server port
    /// - `APP_MODELS_WHISPER_MODEL=base`: override whisper model
    /// - `HOST` / `PORT`: special cases used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml if it exists
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from APP_-prefixed environment variables
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values at startup gives one clear error instead of
    /// scattered runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate cannot be 0"));
        }

        if self.audio.max_clip_seconds == 0 {
            return Err(anyhow::anyhow!("Max clip length must be greater than 0"));
        }

        if self.jobs.max_concurrent == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.media.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Media request timeout must be greater than 0"));
        }

        if self.media.max_download_bytes == 0 {
            return Err(anyhow::anyhow!("Max download size must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.jobs.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.media.max_download_bytes = 0;
        assert!(config.validate().is_err());
    }
}
