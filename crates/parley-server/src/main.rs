//! # Parley Relay
//!
//! Presence-aware chat relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with custom config
//! parley --config /path/to/parley.toml
//!
//! # Run with environment variables
//! PARLEY_PORT=8000 PARLEY_HOST=0.0.0.0 parley
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parley relay - presence-aware chat server
#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: first of parley.toml, /etc/parley/parley.toml,
    /// ~/.config/parley/parley.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_core=debug,parley_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    tracing::info!("Starting Parley relay on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag() {
        let cli = Cli::try_parse_from(["parley"]).unwrap();
        assert_eq!(cli.config, None);

        let cli = Cli::try_parse_from(["parley", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));

        let cli = Cli::try_parse_from(["parley", "-c", "relay.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("relay.toml")));

        assert!(Cli::try_parse_from(["parley", "--config"]).is_err());
        assert!(Cli::try_parse_from(["parley", "--verbose"]).is_err());
    }
}
