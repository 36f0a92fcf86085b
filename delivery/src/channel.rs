//! Channel sender seam.
//!
//! Transport mechanics (SMTP, Twilio, bot APIs) live behind this trait.
//! Implementations normalize their failures into the permanent/transient
//! split the retry policy runs on: a permanent failure (bad address,
//! unsubscribed recipient) must never be retried, a transient one follows
//! the standard backoff.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use account::model::Channel;
use market::detect::SignalKind;
use signal::model::Signal;

#[derive(Debug, Error)]
pub enum SendFailure {
    /// Retrying cannot help: invalid address, revoked webhook, blocked bot.
    #[error("permanent send failure: {0}")]
    Permanent(String),
    /// Worth retrying: provider timeout, rate limit, 5xx.
    #[error("transient send failure: {0}")]
    Transient(String),
}

/// What a subscriber actually receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub signal_id: Uuid,
    pub symbol: String,
    pub kind: SignalKind,
    pub strength: f64,
    pub detected_at_ms: u64,
}

impl AlertPayload {
    pub fn from_signal(signal: &Signal) -> Self {
        Self {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            kind: signal.kind,
            strength: signal.strength,
            detected_at_ms: signal.detected_at_ms,
        }
    }
}

#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, recipient: &str, payload: &AlertPayload) -> Result<(), SendFailure>;
}

/// Maps a channel to its configured sender.
#[derive(Default, Clone)]
pub struct ChannelRouter {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }
}
