//! Application configuration.

use crate::error::{AppError, AppResult};
use config::{Config, Environment, File, FileFormat};
use quotewire_feed::FeedConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Feed endpoint used when nothing else is configured.
pub const DEFAULT_FEED_URL: &str = "ws://localhost:8000/ws/market";

/// Prefix for environment overrides (`QUOTEWIRE__FEED__URL`, ...).
const ENV_PREFIX: &str = "QUOTEWIRE";
const ENV_SEPARATOR: &str = "__";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Feed session settings.
    #[serde(default = "default_feed")]
    pub feed: FeedConfig,
    /// Interval between price summary log lines (ms). Default: 10,000.
    #[serde(default = "default_summary_interval_ms")]
    pub summary_interval_ms: u64,
    /// Latency above this is reported as degraded (ms). Default: 500.
    #[serde(default = "default_latency_warn_ms")]
    pub latency_warn_ms: u64,
    /// Environment variable holding the session token.
    /// `None` disables the authorization check.
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

fn default_feed() -> FeedConfig {
    FeedConfig::new(DEFAULT_FEED_URL)
}

fn default_summary_interval_ms() -> u64 {
    10_000
}

fn default_latency_warn_ms() -> u64 {
    500
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: default_feed(),
            summary_interval_ms: default_summary_interval_ms(),
            latency_warn_ms: default_latency_warn_ms(),
            auth_token_env: None,
        }
    }
}

impl AppConfig {
    /// Load `path` (optional) with `QUOTEWIRE__*` environment overrides on top.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path = %path, "Config file not found, using defaults");
        }
        Self::load_layered(Some(path), None)
    }

    /// Build from an optional TOML file and an environment map.
    ///
    /// `env = None` reads the process environment.
    pub fn load_layered(
        path: Option<&str>,
        env: Option<config::Map<String, String>>,
    ) -> AppResult<Self> {
        let mut builder = Config::builder().set_default("feed.url", DEFAULT_FEED_URL)?;
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(false));
        }
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env);

        let config: Self = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file, without environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides.
    pub fn apply_overrides(&mut self, url: Option<String>, max_retries: Option<u32>) {
        if let Some(url) = url {
            self.feed.url = url;
        }
        if let Some(max_retries) = max_retries {
            self.feed.max_retries = max_retries;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        self.feed.validate()?;
        if self.summary_interval_ms == 0 {
            return Err(AppError::Config(
                "summary_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
