use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Subscription tier. Ordering matters: channel eligibility is expressed
/// as a minimum tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Elite,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
        }
    }

    /// Per-minute / per-day delivery quota for the tier.
    pub fn rate_limits(&self) -> RateLimits {
        match self {
            Tier::Free => RateLimits {
                per_minute: 1,
                per_day: 10,
            },
            Tier::Pro => RateLimits {
                per_minute: 5,
                per_day: 200,
            },
            Tier::Elite => RateLimits {
                per_minute: 20,
                per_day: 1_000,
            },
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "elite" => Ok(Tier::Elite),
            other => Err(anyhow::anyhow!("invalid tier: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

/// Notification channel. Transport lives behind the `ChannelSender` seam;
/// here a channel is an eligibility rule and a credit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Telegram,
    Discord,
}

pub const ALL_CHANNELS: [Channel; 4] = [
    Channel::Email,
    Channel::Sms,
    Channel::Telegram,
    Channel::Discord,
];

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
        }
    }

    /// Lowest tier allowed to use the channel: email unlocks at Pro,
    /// everything else is Elite-only.
    pub fn min_tier(&self) -> Tier {
        match self {
            Channel::Email => Tier::Pro,
            Channel::Sms | Channel::Telegram | Channel::Discord => Tier::Elite,
        }
    }

    /// Credits charged per delivered notification.
    pub fn credit_cost(&self) -> i64 {
        match self {
            Channel::Sms => 3,
            Channel::Email | Channel::Telegram | Channel::Discord => 1,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "telegram" => Ok(Channel::Telegram),
            "discord" => Ok(Channel::Discord),
            other => Err(anyhow::anyhow!("invalid channel: {}", other)),
        }
    }
}

/// Per-user subscription state: identity, quota counters and channel
/// recipients. Counter fields are mutated exclusively through the store's
/// atomic operations; the struct is a read snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub user_id: i64,
    pub account_id: i64,
    pub tier: Tier,
    pub active: bool,
    pub credits_remaining: i64,

    // Channel recipients (None = channel not configured)
    pub email: Option<String>,
    pub sms_number: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook: Option<String>,

    // Alert preferences
    /// None = interested in every symbol.
    pub symbols: Option<Vec<String>>,
    /// Minimum signal strength the user wants to hear about.
    pub min_strength: f64,

    // Quota counters (read snapshot; see AccountStore::bump_rate_counter)
    pub minute_count: i64,
    pub minute_reset_ms: u64,
    pub day_count: i64,
    pub day_reset_ms: u64,
}

impl Subscription {
    pub fn recipient(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.sms_number.as_deref(),
            Channel::Telegram => self.telegram_chat_id.as_deref(),
            Channel::Discord => self.discord_webhook.as_deref(),
        }
    }

    pub fn channel_configured(&self, channel: Channel) -> bool {
        self.recipient(channel).is_some()
    }

    pub fn tier_allows(&self, channel: Channel) -> bool {
        self.tier >= channel.min_tier()
    }

    /// Channels this user can actually be reached on: configured AND
    /// unlocked by the tier.
    pub fn eligible_channels(&self) -> Vec<Channel> {
        ALL_CHANNELS
            .into_iter()
            .filter(|c| self.channel_configured(*c) && self.tier_allows(*c))
            .collect()
    }

    /// Does this subscription want to hear about a signal of the given
    /// symbol and strength?
    pub fn wants(&self, symbol: &str, strength: f64) -> bool {
        if strength < self.min_strength {
            return false;
        }
        match &self.symbols {
            None => true,
            Some(list) => list.iter().any(|s| s == symbol),
        }
    }
}

/// Account-level monthly spend ceiling, shared by every user under the
/// account and independent of their individual credit balances.
#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub account_id: i64,
    pub monthly_cap: i64,
    pub used: i64,
    pub resets_at_ms: u64,
}

/// First instant of the month after `now_ms`, for lazy budget rollover.
pub fn next_month_start_ms(now_ms: u64) -> u64 {
    let now: DateTime<Utc> = Utc
        .timestamp_millis_opt(now_ms as i64)
        .single()
        .unwrap_or_else(Utc::now);

    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    match Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0) {
        chrono::LocalResult::Single(dt) => dt.timestamp_millis() as u64,
        // Unreachable for day-1 midnight, but fail safe with a 31-day hop.
        _ => now_ms + 31 * 86_400_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(tier: Tier) -> Subscription {
        Subscription {
            user_id: 1,
            account_id: 1,
            tier,
            active: true,
            credits_remaining: 100,
            email: Some("user@example.com".to_string()),
            sms_number: None,
            telegram_chat_id: Some("123456".to_string()),
            discord_webhook: None,
            symbols: None,
            min_strength: 2.0,
            minute_count: 0,
            minute_reset_ms: 0,
            day_count: 0,
            day_reset_ms: 0,
        }
    }

    #[test]
    fn free_tier_has_no_eligible_channels() {
        assert!(subscription(Tier::Free).eligible_channels().is_empty());
    }

    #[test]
    fn pro_tier_unlocks_email_but_not_telegram() {
        assert_eq!(
            subscription(Tier::Pro).eligible_channels(),
            vec![Channel::Email]
        );
    }

    #[test]
    fn elite_tier_unlocks_every_configured_channel() {
        assert_eq!(
            subscription(Tier::Elite).eligible_channels(),
            vec![Channel::Email, Channel::Telegram]
        );
    }

    #[test]
    fn wants_honors_min_strength_and_symbol_filter() {
        let mut sub = subscription(Tier::Pro);
        assert!(sub.wants("XYZUSDT", 3.2));
        assert!(!sub.wants("XYZUSDT", 1.5));

        sub.symbols = Some(vec!["AAAUSDT".to_string()]);
        assert!(!sub.wants("XYZUSDT", 3.2));
        assert!(sub.wants("AAAUSDT", 3.2));
    }

    #[test]
    fn tier_and_channel_round_trip_through_strings() {
        for tier in [Tier::Free, Tier::Pro, Tier::Elite] {
            assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
        }
        for channel in ALL_CHANNELS {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
    }

    #[test]
    fn next_month_start_rolls_the_year() {
        // 2023-12-15T00:00:00Z
        let dec = Utc
            .with_ymd_and_hms(2023, 12, 15, 0, 0, 0)
            .unwrap()
            .timestamp_millis() as u64;
        let jan = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis() as u64;

        assert_eq!(next_month_start_ms(dec), jan);
    }
}
