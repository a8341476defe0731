//! ECS exporter: republishes cloud inventory as Prometheus gauges.
//!
//! Startup order:
//! - config (YAML, immutable snapshot)
//! - logging (stdout + rotated file)
//! - IAM token: first fetch must succeed, then refreshed in the background
//! - collector + HTTP server on `server.listen`
//!
//! Every `/metrics` request re-walks the whole inventory API. The token
//! refresh runs on its own schedule and never blocks a scrape.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod collector;
mod config;
mod logging;
mod server;
mod token;

#[cfg(test)]
mod test_support;

use collector::EcsCollector;
use config::Config;
use token::{IamClient, TokenCache};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    logging::init(&config.log)?;
    info!("ECS exporter v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %args.config.display(), "Logger initialized");

    // ── Token ───────────────────────────────────────────────────────
    let tokens = Arc::new(TokenCache::new(
        IamClient::new(&config.api)?,
        config.api.refresh_interval(),
    ));
    tokens
        .start()
        .await
        .context("initial token fetch failed")?;

    // ── Collector + Server ──────────────────────────────────────────
    let collector = Arc::new(EcsCollector::new(&config.api, Arc::clone(&tokens))?);
    let srv = server::Server::new(
        config.server.listen_addr()?,
        Duration::from_secs(config.server.shutdown_grace_secs),
        collector,
    );

    let result = srv.run(server::shutdown_signal()).await;
    tokens.stop().await;
    result
}
