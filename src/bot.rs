use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};

use crate::classifier::Classifier;
use crate::commands::CommandRouter;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, Escalator};
use crate::slack::SlackClient;
use crate::socket;
use crate::twilio::TwilioClient;
use crate::voip::AriClient;

/// Flat delay between reconnect attempts. Retries are infinite.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Wires everything together and runs the connection supervisor. Only
/// returns on a startup error; once connected it runs for the process
/// lifetime.
pub async fn run(config: Config) -> Result<()> {
    let slack = Arc::new(SlackClient::new(
        config.slack.bot_token.clone(),
        config.slack.app_token.clone(),
    ));

    let identity = slack
        .auth_test()
        .await
        .context("Failed to resolve bot identity")?;
    info!(
        "Bot: {} (user id: {}, bot id: {})",
        identity.name, identity.user_id, identity.bot_id
    );

    let classifier = Classifier::new(
        &config.slack.support_tag,
        identity.user_id.clone(),
        config.routing.clone(),
    )?;

    let escalator = Arc::new(Escalator::new(
        slack.clone(),
        AriClient::new(config.voip.clone()),
        TwilioClient::new(config.twilio.clone()),
        config.slack.target_channel.clone(),
        config.slack.escalation_group.clone(),
    ));

    // Messages older than this are history replayed on reconnect.
    let start_time = Utc::now().timestamp_millis() as f64 / 1000.0;

    let mut dispatcher = Dispatcher::new(
        identity,
        start_time,
        config.slack.relay_channels.clone(),
        config.dispatch.dedup_capacity,
        classifier,
        escalator,
    );

    let router = CommandRouter::new(
        slack.clone(),
        config.admin.password.clone(),
        config.slack.target_channel.clone(),
        config.reception.old_api_channels.clone(),
        config.reception.new_api_channels.clone(),
    );

    loop {
        info!("Starting Socket Mode connection...");
        match socket::run_connection(&slack, &mut dispatcher, &router).await {
            Ok(()) => info!("Socket Mode connection closed"),
            Err(e) => error!("Socket Mode connection failed: {:#}", e),
        }
        info!("Reconnecting in {} seconds...", RECONNECT_DELAY.as_secs());
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
