//! Warden - protective-order supervisor for open futures positions.
//!
//! Keeps stops and targets in step with advisory decisions, tops up,
//! repositions entry orders and cancels stale ones.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Protective-order warden
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via WARDEN_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    warden_telemetry::init_logging()?;

    info!("Starting warden v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > WARDEN_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("WARDEN_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = warden_bot::AppConfig::from_file(&config_path)?;
    config.validate()?;
    info!(
        data_dir = %config.registry.data_dir.display(),
        watchdog_mode = config.watchdog.mode.as_str(),
        "Configuration loaded"
    );

    let app = warden_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
