//! Credit & budget ledger.
//!
//! `authorize` is the single gate every delivery attempt passes through.
//! Checks run in a fixed order and the first failing check wins:
//!
//!   1. subscription active, channel configured and tier-eligible
//!   2. per-minute counter
//!   3. per-day counter
//!   4. per-user credit balance
//!   5. account-level monthly budget cap
//!
//! Rate-limit denials are digest-eligible (the signal is deferred, not
//! dropped); every other denial is terminal for this (user, channel)
//! attempt. All mutations go through the store's atomic conditional
//! updates, so concurrent authorizations against one balance can never
//! both succeed past what remains.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::model::{Channel, Subscription, next_month_start_ms};
use crate::store::{AccountStore, RateWindow};

/// Outcome of an authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed { cost: i64 },
    /// Over quota for the window; offer the digest fallback.
    DeniedRateLimited,
    DeniedInactive,
    DeniedChannelNotConfigured,
    DeniedInsufficientCredits,
    DeniedBudgetExhausted,
}

impl Authorization {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Authorization::Allowed { .. })
    }

    /// Deferred rather than dropped: route to the user's digest batch.
    pub fn digest_fallback(&self) -> bool {
        matches!(self, Authorization::DeniedRateLimited)
    }

    /// Terminal for this attempt: record a failed delivery, enqueue nothing.
    pub fn is_terminal_deny(&self) -> bool {
        !self.is_allowed() && !self.digest_fallback()
    }

    pub fn deny_reason(&self) -> Option<&'static str> {
        match self {
            Authorization::Allowed { .. } => None,
            Authorization::DeniedRateLimited => Some("rate-limited"),
            Authorization::DeniedInactive => Some("subscription-inactive"),
            Authorization::DeniedChannelNotConfigured => Some("channel-not-configured"),
            Authorization::DeniedInsufficientCredits => Some("insufficient-credits"),
            Authorization::DeniedBudgetExhausted => Some("budget-exhausted"),
        }
    }
}

pub struct CreditLedger {
    store: Arc<dyn AccountStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    #[instrument(
        skip(self, sub),
        target = "ledger",
        fields(user_id = sub.user_id, account_id = sub.account_id, channel = %channel)
    )]
    pub async fn authorize(
        &self,
        sub: &Subscription,
        channel: Channel,
        now_ms: u64,
    ) -> anyhow::Result<Authorization> {
        if !sub.active {
            return Ok(Authorization::DeniedInactive);
        }

        if !sub.channel_configured(channel) || !sub.tier_allows(channel) {
            return Ok(Authorization::DeniedChannelNotConfigured);
        }

        let limits = sub.tier.rate_limits();

        if !self
            .store
            .bump_rate_counter(sub.user_id, RateWindow::Minute, limits.per_minute, now_ms)
            .await?
        {
            debug!("per-minute quota exhausted");
            return Ok(Authorization::DeniedRateLimited);
        }

        if !self
            .store
            .bump_rate_counter(sub.user_id, RateWindow::Day, limits.per_day, now_ms)
            .await?
        {
            debug!("per-day quota exhausted");
            return Ok(Authorization::DeniedRateLimited);
        }

        let cost = channel.credit_cost();

        if !self.store.try_consume_credits(sub.user_id, cost).await? {
            return Ok(Authorization::DeniedInsufficientCredits);
        }

        if !self
            .store
            .try_consume_budget(sub.account_id, cost, next_month_start_ms(now_ms), now_ms)
            .await?
        {
            // The credit was already taken; put it back before denying.
            self.store.refund_credits(sub.user_id, cost).await?;
            return Ok(Authorization::DeniedBudgetExhausted);
        }

        Ok(Authorization::Allowed { cost })
    }
}
