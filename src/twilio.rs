use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{error, info};

use crate::config::TwilioConfig;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Places outbound calls through the Twilio REST API.
pub struct TwilioClient {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioClient {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Calls every configured destination. Per-destination failures are
    /// logged and do not stop the remaining destinations.
    pub async fn call_all(&self) -> Result<()> {
        for destination in &self.config.targets {
            if let Err(e) = self.place_call(destination).await {
                error!("Twilio call to {} failed: {:#}", destination, e);
            }
        }
        Ok(())
    }

    async fn place_call(&self, to: &str) -> Result<()> {
        info!("Calling - {}", to);
        let url = format!(
            "{}/Accounts/{}/Calls.json",
            TWILIO_API_BASE, self.config.account_sid
        );
        let params = [
            ("From", self.config.from_number.as_str()),
            ("To", to),
            ("Url", self.config.voice_url.as_str()),
            ("Timeout", "60"),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to reach the Twilio API")?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Twilio error: {} - {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse the Twilio response")?;
        let sid = body["sid"].as_str().unwrap_or("unknown");
        info!("Call started. SID: {}, {}", sid, to);
        Ok(())
    }
}
