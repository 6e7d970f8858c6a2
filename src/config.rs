//! Configuration file parser for ~/.config/chapterfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{DEFAULT_CHAPTERS_PER_TITLE, DEFAULT_CONCURRENCY};
use crate::upstream::{RetryPolicy, DEFAULT_API_BASE};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the ComicK API.
    pub api_base_url: String,

    /// SQLite file backing the mapping store and chapter cache.
    /// Relative paths resolve against the config directory.
    pub database_path: String,

    /// User-Agent sent with every upstream request.
    pub user_agent: String,

    /// Per-attempt request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Total attempts per upstream request, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry, doubled for each further retry.
    pub retry_base_delay_ms: u64,

    /// Cap on the exponential part of the retry delay.
    pub retry_max_delay_ms: u64,

    /// Maximum random jitter added to each retry delay.
    pub retry_jitter_ms: u64,

    /// Chapters requested per title when building a feed.
    pub chapters_per_title: u32,

    /// Titles fetched concurrently during aggregation and warming.
    pub fetch_concurrency: usize,

    /// Days an unread feed mapping is kept.
    pub mapping_retention_days: u64,

    /// Minutes a per-title chapter list stays cached.
    pub chapter_cache_ttl_minutes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            database_path: "feeds.db".to_string(),
            user_agent: concat!("chapterfeed/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            retry_jitter_ms: 200,
            chapters_per_title: DEFAULT_CHAPTERS_PER_TITLE,
            fetch_concurrency: DEFAULT_CONCURRENCY,
            mapping_retention_days: 30,
            chapter_cache_ttl_minutes: 60,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "api_base_url",
        "database_path",
        "user_agent",
        "request_timeout_secs",
        "max_attempts",
        "retry_base_delay_ms",
        "retry_max_delay_ms",
        "retry_jitter_ms",
        "chapters_per_title",
        "fetch_concurrency",
        "mapping_retention_days",
        "chapter_cache_ttl_minutes",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge or corrupted file
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn mapping_retention(&self) -> Duration {
        Duration::from_secs(self.mapping_retention_days.max(1).saturating_mul(24 * 60 * 60))
    }

    pub fn chapter_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.chapter_cache_ttl_minutes.saturating_mul(60))
    }
}

// ============================================================================
// Tests
// ============================================================================
