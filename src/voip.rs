use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info};

use crate::config::VoipConfig;

/// Originates calls through the Asterisk REST interface. Each configured
/// endpoint is rung with the `quick-call` Stasis application.
pub struct AriClient {
    http: reqwest::Client,
    config: VoipConfig,
}

impl AriClient {
    pub fn new(config: VoipConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Rings every configured endpoint. Per-endpoint failures are logged
    /// and do not stop the remaining endpoints.
    pub async fn quick_call(&self) -> Result<()> {
        for target in &self.config.targets {
            if let Err(e) = self.originate(target).await {
                error!("Quick call to {} failed: {:#}", target, e);
            }
        }
        Ok(())
    }

    async fn originate(&self, endpoint: &str) -> Result<()> {
        let url = format!("http://{}:8088/ari/channels", self.config.host);
        let response = self
            .http
            .post(&url)
            .query(&[("endpoint", endpoint), ("app", "quick-call")])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("Failed to reach the ARI endpoint")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("ARI error: {}", status);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse the ARI response")?;
        let channel_id = body["id"].as_str().unwrap_or("unknown");
        info!("Successfully called - {}", channel_id);
        Ok(())
    }
}
