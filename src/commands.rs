use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::event::SlashCommand;
use crate::slack::{Notifier, PostOptions};
use crate::texts::Language;

/// Closed set of supported slash commands. Anything else is rejected at
/// the router boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Simple acknowledgment reply.
    Rocket,
    /// Broadcast the outage notice to the old-API channels.
    CloseReceptionOldApi,
    /// Broadcast the outage notice to the new-API channels.
    CloseReceptionNewApi,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl Command {
    pub fn parse(name: &str) -> Result<Self, UnknownCommand> {
        match name {
            "/rocket" => Ok(Command::Rocket),
            "/close_reception_old_api" => Ok(Command::CloseReceptionOldApi),
            "/close_reception_new_api" => Ok(Command::CloseReceptionNewApi),
            other => Err(UnknownCommand(other.to_string())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Command::Rocket => "rocket",
            Command::CloseReceptionOldApi => "close_reception_old_api",
            Command::CloseReceptionNewApi => "close_reception_new_api",
        }
    }
}

/// Routes slash commands to their handlers.
pub struct CommandRouter {
    notifier: Arc<dyn Notifier>,
    admin_password: String,
    target_channel: String,
    old_api_channels: HashMap<String, Language>,
    new_api_channels: HashMap<String, Language>,
}

impl CommandRouter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        admin_password: String,
        target_channel: String,
        old_api_channels: HashMap<String, Language>,
        new_api_channels: HashMap<String, Language>,
    ) -> Self {
        Self {
            notifier,
            admin_password,
            target_channel,
            old_api_channels,
            new_api_channels,
        }
    }

    /// Handles one slash command to completion; failures are logged so
    /// the socket loop is never affected.
    pub async fn handle(&self, payload: &SlashCommand) {
        let command = match Command::parse(&payload.command) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected slash command from {}: {}", payload.user_id, e);
                return;
            }
        };

        info!("Command received: {} from {}", payload.command, payload.user_name);
        match command {
            Command::Rocket => self.rocket(payload).await,
            Command::CloseReceptionOldApi => {
                self.close_reception(payload, command, &self.old_api_channels)
                    .await
            }
            Command::CloseReceptionNewApi => {
                self.close_reception(payload, command, &self.new_api_channels)
                    .await
            }
        }
    }

    async fn rocket(&self, payload: &SlashCommand) {
        let text = format!("HELLO, <@{}>!", payload.user_id);
        if let Err(e) = self
            .notifier
            .post_message(&payload.channel_id, &text, PostOptions::default())
            .await
        {
            error!("Error on response: {:#}", e);
        }
    }

    /// Posts the localized outage notice to every configured channel,
    /// then logs one summary line to the broadcast channel. Requires the
    /// shared admin password as the command text; per-channel failures
    /// do not abort the remaining channels.
    async fn close_reception(
        &self,
        payload: &SlashCommand,
        command: Command,
        channels: &HashMap<String, Language>,
    ) {
        if payload.text != self.admin_password {
            warn!(
                "Wrong password for command {} from {}",
                command.name(),
                payload.user_id
            );
            return;
        }

        for (channel, language) in channels {
            if let Err(e) = self
                .notifier
                .post_message(channel, language.close_reception_text(), PostOptions::default())
                .await
            {
                error!("Error posting outage notice to {}: {:#}", channel, e);
            }
        }

        let summary = format!("{} sent command {}", payload.user_name, command.name());
        info!("{}", summary);
        if let Err(e) = self
            .notifier
            .post_message(&self.target_channel, &summary, PostOptions::default())
            .await
        {
            error!("Error logging command to {}: {:#}", self.target_channel, e);
        }
    }
}
