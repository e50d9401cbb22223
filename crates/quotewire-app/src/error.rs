//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authorized to open the market feed")]
    Unauthorized,

    #[error("Feed error: {0}")]
    Feed(#[from] quotewire_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] quotewire_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
