mod bot;
mod classifier;
mod commands;
mod config;
mod dispatcher;
mod event;
mod slack;
mod socket;
mod texts;
mod twilio;
mod voip;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Delay before restarting the whole bot after an error that escaped
/// every inner handler.
const RESTART_DELAY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,supportbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Target channel: {}", config.slack.target_channel);
    info!("  Support tag: {}", config.slack.support_tag);
    info!("  VIP channels: {:?}", config.routing.vip_channels);
    info!("  Quick-call targets: {}", config.voip.targets.len());
    info!("  Twilio targets: {}", config.twilio.targets.len());

    info!("Starting Slack support bot");
    loop {
        if let Err(e) = bot::run(config.clone()).await {
            error!("Critical error: {:#}", e);
            info!("Restarting in {} seconds...", RESTART_DELAY.as_secs());
            tokio::time::sleep(RESTART_DELAY).await;
        }
    }
}
