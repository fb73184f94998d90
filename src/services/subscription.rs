//! Subscription state machine.
//!
//! State is always recomputed from the stored dates; nothing here writes a
//! transition except the downgrade sweep, which persists `Expired -> Free`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::user::{Subscription, SubscriptionTier};
use crate::services::credits::CreditPolicy;
use crate::services::dates::{compute_end_date, compute_grace_period_end};

/// Days before the end date from which the renewal reminder state starts.
pub const GRACE_NOTICE_DAYS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription history, already downgraded, or a period not yet started.
    Free,
    Active,
    /// Final days of the period or the 48h after it; paid access retained.
    GracePeriod,
    /// Past the grace window, awaiting the downgrade sweep.
    Expired,
    Admin,
}

impl SubscriptionState {
    pub fn has_paid_access(self) -> bool {
        matches!(self, SubscriptionState::Active | SubscriptionState::GracePeriod)
    }
}

pub fn is_grace(
    subscription_end: DateTime<Utc>,
    grace_period_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    now <= grace_period_end
        && (subscription_end < now || subscription_end - now <= Duration::days(GRACE_NOTICE_DAYS))
}

pub fn grace_period_end(sub: &Subscription) -> Option<DateTime<Utc>> {
    sub.subscription_end_date.map(compute_grace_period_end)
}

pub fn state_at(sub: &Subscription, now: DateTime<Utc>) -> SubscriptionState {
    match sub.subscription_tier {
        SubscriptionTier::Admin => SubscriptionState::Admin,
        SubscriptionTier::Free => SubscriptionState::Free,
        SubscriptionTier::StarterTrader | SubscriptionTier::ProTrader => {
            // A paid tier without an end date has no period to grant access.
            let Some(end) = sub.subscription_end_date else {
                return SubscriptionState::Expired;
            };
            if sub.subscription_start_date.is_some_and(|start| now < start) {
                return SubscriptionState::Free;
            }
            if is_grace(end, compute_grace_period_end(end), now) {
                SubscriptionState::GracePeriod
            } else if now <= end {
                SubscriptionState::Active
            } else {
                SubscriptionState::Expired
            }
        }
    }
}

/// The tier that limits and cooldowns are looked up with.
pub fn effective_tier(sub: &Subscription, now: DateTime<Utc>) -> SubscriptionTier {
    match state_at(sub, now) {
        SubscriptionState::Admin => SubscriptionTier::Admin,
        SubscriptionState::Active | SubscriptionState::GracePeriod => sub.subscription_tier,
        SubscriptionState::Expired | SubscriptionState::Free => SubscriptionTier::Free,
    }
}

pub fn needs_downgrade(sub: &Subscription, now: DateTime<Utc>) -> bool {
    state_at(sub, now) == SubscriptionState::Expired
}

/// Whole days until the paid period ends, clamped at zero.
pub fn days_remaining(sub: &Subscription, now: DateTime<Utc>) -> Option<i64> {
    sub.subscription_end_date
        .filter(|_| sub.subscription_tier.is_paid())
        .map(|end| (end - now).num_days().max(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The period written when a payment for `plan` is confirmed.
///
/// While paid access remains the new months are added after the current end.
/// Renewing the same plan keeps the original start, so the billing cycle
/// anchor does not move.
pub fn renewal_window(
    sub: &Subscription,
    plan: SubscriptionTier,
    months: u32,
    now: DateTime<Utc>,
) -> AppResult<PaidWindow> {
    let current = sub
        .subscription_end_date
        .filter(|_| state_at(sub, now).has_paid_access());

    let Some(current_end) = current else {
        return Ok(PaidWindow {
            start: now,
            end: compute_end_date(now, months)?,
        });
    };

    let start = match sub.subscription_start_date {
        Some(start) if sub.subscription_tier == plan => start,
        _ => now,
    };
    Ok(PaidWindow {
        start,
        end: compute_end_date(current_end.max(now), months)?,
    })
}

// ── Downgrade Sweep ──────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct SweepCandidate {
    id: Uuid,
    #[sqlx(flatten)]
    subscription: Subscription,
}

pub fn spawn_downgrade_sweeper(db: PgPool, policy: std::sync::Arc<CreditPolicy>, every_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(every_secs));
        loop {
            interval.tick().await;
            match sweep_expired_subscriptions(&db, &policy, Utc::now()).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(downgraded = count, "Subscription sweep: downgraded lapsed users");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Subscription sweep worker error");
                }
            }
        }
    });
}

pub async fn sweep_expired_subscriptions(
    db: &PgPool,
    policy: &CreditPolicy,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let candidates = sqlx::query_as::<_, SweepCandidate>(
        r#"
        SELECT id, subscription_tier, subscription_start_date, subscription_end_date,
               subscription_period, grace_period_end_date, is_first_time_subscriber
        FROM users
        WHERE subscription_tier IN ('starter_trader', 'pro_trader')
          AND (subscription_end_date IS NULL OR subscription_end_date < $1)
        "#,
    )
    .bind(now)
    .fetch_all(db)
    .await?;

    let free = policy.limits_for(SubscriptionTier::Free);
    let mut downgraded = 0;

    for candidate in candidates
        .into_iter()
        .filter(|c| needs_downgrade(&c.subscription, now))
    {
        // Guarded on the dates we evaluated so a concurrent renewal wins.
        let result = sqlx::query(
            r#"
            UPDATE users SET
                subscription_tier = 'free',
                subscription_start_date = NULL,
                subscription_end_date = NULL,
                subscription_period = NULL,
                grace_period_end_date = NULL,
                max_daily_credits = $3,
                max_monthly_credits = $4,
                updated_at = NOW()
            WHERE id = $1
              AND subscription_end_date IS NOT DISTINCT FROM $2
              AND subscription_tier IN ('starter_trader', 'pro_trader')
            "#,
        )
        .bind(candidate.id)
        .bind(candidate.subscription.subscription_end_date)
        .bind(free.daily_limit)
        .bind(free.monthly_limit)
        .execute(db)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(
                user_id = %candidate.id,
                previous_tier = %candidate.subscription.subscription_tier,
                "Subscription expired, downgraded to free"
            );
            downgraded += 1;
        }
    }

    Ok(downgraded)
}
