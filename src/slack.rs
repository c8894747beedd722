use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Slack Web API base URL.
const SLACK_API_BASE: &str = "https://slack.com/api";

/// The bot's own identity, resolved once at startup via `auth.test` and
/// used for self-message filtering.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub name: String,
    pub user_id: String,
    pub bot_id: String,
}

/// Flags for `chat.postMessage`. Escalation notices enable link-name
/// resolution so the group handle pings its members.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostOptions {
    pub link_names: bool,
    pub mrkdwn: bool,
}

impl PostOptions {
    pub fn escalation() -> Self {
        Self {
            link_names: true,
            mrkdwn: true,
        }
    }
}

/// Outbound messaging surface, split out so command and dispatch logic
/// can be tested against a recording implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str, opts: PostOptions) -> Result<()>;
}

/// Thin client over the Slack Web API.
pub struct SlackClient {
    http: reqwest::Client,
    bot_token: String,
    app_token: String,
}

impl SlackClient {
    pub fn new(bot_token: String, app_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            app_token,
        }
    }

    async fn call_api(&self, method: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}/{}", SLACK_API_BASE, method);
        debug!("Calling Slack API: {}", method);

        let mut request = self.http.post(&url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach Slack API method {}", method))?;
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response of {}", method))?;

        check_ok(&body, method)?;
        Ok(body)
    }

    /// Resolve the bot's own user id and bot id via `auth.test`.
    pub async fn auth_test(&self) -> Result<BotIdentity> {
        let body = self.call_api("auth.test", &self.bot_token, None).await?;
        let user_id = body["user_id"]
            .as_str()
            .context("auth.test response has no user_id")?;
        let name = body["user"].as_str().unwrap_or_default();
        let bot_id = body["bot_id"].as_str().unwrap_or_default();
        Ok(BotIdentity {
            name: name.to_string(),
            user_id: user_id.to_string(),
            bot_id: bot_id.to_string(),
        })
    }

    /// Resolve a permanent link to a posted message.
    pub async fn get_permalink(&self, channel: &str, ts: &str) -> Result<String> {
        debug!("Getting permalink for channel={}, ts={}", channel, ts);
        let body = self
            .call_api(
                "chat.getPermalink",
                &self.bot_token,
                Some(&json!({ "channel": channel, "message_ts": ts })),
            )
            .await?;
        let permalink = body["permalink"]
            .as_str()
            .context("chat.getPermalink response has no permalink")?;
        Ok(permalink.to_string())
    }

    /// Request a Socket Mode WebSocket URL via `apps.connections.open`.
    pub async fn connections_open(&self) -> Result<String> {
        let body = self
            .call_api("apps.connections.open", &self.app_token, None)
            .await?;
        let url = body["url"]
            .as_str()
            .context("apps.connections.open response has no url")?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl Notifier for SlackClient {
    async fn post_message(&self, channel: &str, text: &str, opts: PostOptions) -> Result<()> {
        let mut body = json!({ "channel": channel, "text": text });
        if opts.link_names {
            body["link_names"] = json!(true);
        }
        if opts.mrkdwn {
            body["mrkdwn"] = json!(true);
        }
        self.call_api("chat.postMessage", &self.bot_token, Some(&body))
            .await?;
        Ok(())
    }
}

/// Slack wraps errors in an `ok: false` body rather than HTTP status codes.
fn check_ok(body: &Value, method: &str) -> Result<()> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    let error = body["error"].as_str().unwrap_or("unknown");
    anyhow::bail!("{} failed: {}", method, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ok_success() {
        let body = json!({"ok": true, "user_id": "U1"});
        assert!(check_ok(&body, "auth.test").is_ok());
    }

    #[test]
    fn test_check_ok_carries_error_field() {
        let body = json!({"ok": false, "error": "channel_not_found"});
        let err = check_ok(&body, "chat.postMessage").unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
    }

    #[test]
    fn test_check_ok_missing_flag() {
        let body = json!({"something": "else"});
        assert!(check_ok(&body, "auth.test").is_err());
    }

    #[test]
    fn test_escalation_options() {
        let opts = PostOptions::escalation();
        assert!(opts.link_names);
        assert!(opts.mrkdwn);
        let plain = PostOptions::default();
        assert!(!plain.link_names);
    }
}
