use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use account::model::{Channel, Subscription};
use signal::model::Signal;

pub type DeliveryId = Uuid;

/// Lifecycle of one (signal, user, channel) delivery attempt.
///
/// Queued is the only non-terminal state; Sent, Failed and Digested are
/// terminal. Transitions are compare-and-set in the store so that two
/// workers can never both complete the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Failed,
    Digested,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Digested => "digested",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "digested" => Ok(DeliveryStatus::Digested),
            other => Err(anyhow::anyhow!("invalid delivery status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub signal_id: Uuid,
    pub user_id: i64,
    pub channel: Channel,
    pub status: DeliveryStatus,
    /// Credits charged for this delivery; zero when nothing was consumed.
    pub cost: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_ms: u64,
    pub updated_ms: u64,
}

impl DeliveryRecord {
    fn new(
        signal: &Signal,
        sub: &Subscription,
        channel: Channel,
        status: DeliveryStatus,
        cost: i64,
        last_error: Option<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            user_id: sub.user_id,
            channel,
            status,
            cost,
            attempts: 0,
            last_error,
            created_ms: now_ms,
            updated_ms: now_ms,
        }
    }

    pub fn queued(
        signal: &Signal,
        sub: &Subscription,
        channel: Channel,
        cost: i64,
        now_ms: u64,
    ) -> Self {
        Self::new(signal, sub, channel, DeliveryStatus::Queued, cost, None, now_ms)
    }

    pub fn digested(signal: &Signal, sub: &Subscription, channel: Channel, now_ms: u64) -> Self {
        Self::new(
            signal,
            sub,
            channel,
            DeliveryStatus::Digested,
            0,
            None,
            now_ms,
        )
    }

    pub fn failed(
        signal: &Signal,
        sub: &Subscription,
        channel: Channel,
        reason: &str,
        now_ms: u64,
    ) -> Self {
        Self::new(
            signal,
            sub,
            channel,
            DeliveryStatus::Failed,
            0,
            Some(reason.to_string()),
            now_ms,
        )
    }
}
