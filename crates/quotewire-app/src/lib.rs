//! quotewire command line feed client.
//!
//! Wires configuration, the authorization gate and telemetry around one
//! market feed session:
//! - Layered configuration (TOML file, `QUOTEWIRE__*` environment, CLI)
//! - Authorization check before connecting
//! - Metrics recorder and periodic price summary as independent consumers

pub mod app;
pub mod auth;
pub mod config;
pub mod consumers;
pub mod error;

pub use app::Application;
pub use auth::{EnvTokenAuthorizer, OpenAccess, SessionAuthorizer};
pub use crate::config::AppConfig;
pub use consumers::{FeedSummary, LatencyHealth, MetricsRecorder};
pub use error::{AppError, AppResult};
