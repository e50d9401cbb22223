//! quotewire - market data feed client.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Resilient market data feed client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via QUOTEWIRE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Feed endpoint, overrides `feed.url`
    #[arg(long)]
    url: Option<String>,

    /// Reconnect attempts after an unexpected close, overrides `feed.max_retries`
    #[arg(long)]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connection is opened.
    quotewire_ws::init_crypto();

    let args = Args::parse();

    quotewire_telemetry::init_logging()?;

    info!("Starting quotewire v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > QUOTEWIRE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("QUOTEWIRE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = quotewire_app::AppConfig::load(&config_path)?;
    config.apply_overrides(args.url, args.max_retries);
    config.validate()?;
    info!(
        url = %config.feed.url,
        max_retries = config.feed.max_retries,
        ping_interval_ms = config.feed.ping_interval_ms,
        "Configuration loaded"
    );

    let app = quotewire_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
