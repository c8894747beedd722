use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::texts::Language;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub reception: ReceptionConfig,
    pub voip: VoipConfig,
    pub twilio: TwilioConfig,
    #[serde(default = "default_dispatch_config")]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub app_token: String,
    /// Channel that receives escalation notices and command logs.
    pub target_channel: String,
    /// Substring that marks a message for human escalation.
    /// Used verbatim as a case-insensitive regex pattern.
    pub support_tag: String,
    /// Group handle tagged in every forwarded escalation.
    #[serde(default = "default_escalation_group")]
    pub escalation_group: String,
    /// Channels allowed to relay bot-originated messages (subtype
    /// `bot_message`). The dev-call channel must be listed here for
    /// alert-triggered calls to work.
    #[serde(default)]
    pub relay_channels: Vec<String>,
}

/// Channel routing for the classifier: VIP channels and the dev-call
/// alert source.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoutingConfig {
    /// Channels where any qualifying message triggers a quick call.
    #[serde(default)]
    pub vip_channels: Vec<String>,
    #[serde(default)]
    pub dev_call_channel: String,
    #[serde(default)]
    pub dev_call_bot_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    /// Shared password required by the close-reception commands.
    pub password: String,
}

/// Channel → language maps for the close-reception broadcasts.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReceptionConfig {
    #[serde(default)]
    pub old_api_channels: HashMap<String, Language>,
    #[serde(default)]
    pub new_api_channels: HashMap<String, Language>,
}

/// Asterisk REST interface settings for the quick-call backend.
#[derive(Debug, Deserialize, Clone)]
pub struct VoipConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// SIP endpoints rung on every quick call.
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    /// Destination numbers/SIP addresses called on every alert.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_voice_url")]
    pub voice_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Maximum number of remembered message timestamps; oldest entries
    /// are evicted once the limit is reached.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_escalation_group() -> String {
    "fls_group".to_string()
}

fn default_voice_url() -> String {
    "http://demo.twilio.com/docs/voice.xml".to_string()
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        dedup_capacity: default_dedup_capacity(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("slack.bot_token", &self.slack.bot_token),
            ("slack.app_token", &self.slack.app_token),
            ("slack.target_channel", &self.slack.target_channel),
            ("slack.support_tag", &self.slack.support_tag),
            ("admin.password", &self.admin.password),
        ];
        for (name, value) in required {
            if value.is_empty() {
                anyhow::bail!("Config field {} must not be empty", name);
            }
        }
        Ok(())
    }
}
