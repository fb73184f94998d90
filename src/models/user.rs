use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::services::credits::{CreditPolicy, TierLimits};
use crate::services::subscription::{self, SubscriptionState};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub subscription: Subscription,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub credits: CreditAccount,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub challenge: ChallengeState,
    /// Denormalised copy of the tier table, rewritten whenever the tier changes.
    pub max_daily_credits: Option<i32>,
    pub max_monthly_credits: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Default)]
#[sqlx(type_name = "subscription_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Free,
    StarterTrader,
    ProTrader,
    Admin,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Free,
        SubscriptionTier::StarterTrader,
        SubscriptionTier::ProTrader,
        SubscriptionTier::Admin,
    ];

    /// Tiers that are bought through a payment request and expire.
    pub fn is_paid(self) -> bool {
        matches!(self, SubscriptionTier::StarterTrader | SubscriptionTier::ProTrader)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::StarterTrader => "starter_trader",
            SubscriptionTier::ProTrader => "pro_trader",
            SubscriptionTier::Admin => "admin",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubscriptionTier::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown plan '{}'", s))
    }
}

/// The subscription columns of a user row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Subscription {
    pub subscription_tier: SubscriptionTier,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub subscription_period: Option<i32>,
    pub grace_period_end_date: Option<DateTime<Utc>>,
    pub is_first_time_subscriber: bool,
}

/// Consumed-credit counters and the cooldown anchor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct CreditAccount {
    pub daily_credits: i32,
    pub monthly_credits: i32,
    pub last_credit_reset: Option<DateTime<Utc>>,
    pub last_generation_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct ChallengeState {
    pub monthly_completion_streak: i32,
    pub pending_discount_code: Option<String>,
    pub consumed_discount_code: Option<String>,
    /// Billing cycle the latest code was issued for.
    pub discount_cycle_start: Option<DateTime<Utc>>,
    pub discount_cycle_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub subscription_tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub subscription_state: SubscriptionState,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub limits: TierLimits,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn build(user: User, policy: &CreditPolicy, now: DateTime<Utc>) -> Self {
        let state = subscription::state_at(&user.subscription, now);
        let effective_tier = subscription::effective_tier(&user.subscription, now);
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            subscription_tier: user.subscription.subscription_tier,
            effective_tier,
            subscription_state: state,
            subscription_end_date: user.subscription.subscription_end_date,
            limits: policy.limits_for(effective_tier).clone(),
            created_at: user.created_at,
        }
    }
}
