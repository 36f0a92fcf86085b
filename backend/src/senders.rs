//! Default channel sender wiring.
//!
//! Discord delivery is a plain webhook POST and is implemented here.
//! Email/SMS/Telegram transports are owned by provider integrations that
//! live outside this service; until those land, `LogSender` stands in.
//! It records the delivery in the logs and reports success, which keeps
//! the ledger/record pipeline exercised end to end.

use async_trait::async_trait;
use tracing::info;

use account::model::Channel;
use delivery::channel::{AlertPayload, ChannelSender, SendFailure};

/// Placeholder transport: logs the alert instead of sending it.
pub struct LogSender {
    channel: Channel,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LogSender {
    async fn send(&self, recipient: &str, payload: &AlertPayload) -> Result<(), SendFailure> {
        info!(
            channel = %self.channel,
            recipient,
            symbol = %payload.symbol,
            kind = %payload.kind,
            strength = payload.strength,
            "alert delivered (log transport)"
        );
        Ok(())
    }
}

/// Discord webhook sender: recipient is the user's webhook URL.
pub struct DiscordWebhookSender {
    http: reqwest::Client,
}

impl DiscordWebhookSender {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ChannelSender for DiscordWebhookSender {
    async fn send(&self, recipient: &str, payload: &AlertPayload) -> Result<(), SendFailure> {
        let body = serde_json::json!({
            "content": format!(
                "**{}**: {} at {:.1}x",
                payload.symbol, payload.kind, payload.strength
            ),
            "embeds": [{
                "title": payload.symbol,
                "description": format!("{} (strength {:.2})", payload.kind, payload.strength),
            }]
        });

        let response = self
            .http
            .post(recipient)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendFailure::Transient(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 404/401/403 mean the webhook is gone or revoked; retrying the
        // same URL cannot help. Everything else gets the backoff path.
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(SendFailure::Permanent(format!(
                "webhook rejected with status {status}"
            )))
        } else {
            Err(SendFailure::Transient(format!(
                "webhook returned status {status}"
            )))
        }
    }
}
