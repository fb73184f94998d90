//! Credit & cooldown gate.
//!
//! Admission is reserve-then-commit-or-rollback: credits and the cooldown
//! anchor are written under the user's row lock before the model is called,
//! and a failed generation releases them again. The model call itself never
//! runs while the lock is held.

use std::future::Future;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::signal::{Timeframe, TradingSignal};
use crate::models::user::{CreditAccount, Subscription, SubscriptionTier};
use crate::services::dates::{local_date, local_month};
use crate::services::signal_model::{SignalModel, SignalRequest};
use crate::services::subscription::{self, SubscriptionState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    pub tier: SubscriptionTier,
    /// `None` is unlimited.
    pub daily_limit: Option<i32>,
    pub monthly_limit: Option<i32>,
    pub cooldown_minutes: i64,
}

impl TierLimits {
    pub fn standard(tier: SubscriptionTier) -> Self {
        let (daily_limit, monthly_limit, cooldown_minutes) = match tier {
            SubscriptionTier::Free => (Some(2), Some(10), 90),
            SubscriptionTier::StarterTrader => (Some(10), Some(60), 30),
            SubscriptionTier::ProTrader => (None, None, 15),
            SubscriptionTier::Admin => (None, None, 0),
        };
        Self {
            tier,
            daily_limit,
            monthly_limit,
            cooldown_minutes,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes)
    }

    /// Credits left before either ceiling is hit.
    pub fn remaining(&self, daily_used: i32, monthly_used: i32) -> Option<i32> {
        let daily = self.daily_limit.map(|l| (l - daily_used).max(0));
        let monthly = self.monthly_limit.map(|l| (l - monthly_used).max(0));
        match (daily, monthly) {
            (Some(d), Some(m)) => Some(d.min(m)),
            (Some(left), None) | (None, Some(left)) => Some(left),
            (None, None) => None,
        }
    }
}

/// The one authoritative tier table, plus the local offset at which
/// daily and monthly counters roll over.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    tiers: [TierLimits; 4],
    rollover: FixedOffset,
}

fn slot(tier: SubscriptionTier) -> usize {
    match tier {
        SubscriptionTier::Free => 0,
        SubscriptionTier::StarterTrader => 1,
        SubscriptionTier::ProTrader => 2,
        SubscriptionTier::Admin => 3,
    }
}

impl CreditPolicy {
    pub fn standard(rollover: FixedOffset) -> Self {
        Self {
            tiers: SubscriptionTier::ALL.map(TierLimits::standard),
            rollover,
        }
    }

    pub fn limits_for(&self, tier: SubscriptionTier) -> &TierLimits {
        &self.tiers[slot(tier)]
    }

    pub fn tiers(&self) -> &[TierLimits] {
        &self.tiers
    }

    pub fn rollover(&self) -> FixedOffset {
        self.rollover
    }
}

/// Zeroes counters whose day or month has rolled over since the last reset.
pub fn reconcile_counters(
    credits: &CreditAccount,
    now: DateTime<Utc>,
    rollover: FixedOffset,
) -> CreditAccount {
    let mut next = credits.clone();
    let Some(last_reset) = credits.last_credit_reset else {
        next.daily_credits = 0;
        next.monthly_credits = 0;
        next.last_credit_reset = Some(now);
        return next;
    };

    let new_day = local_date(now, rollover) > local_date(last_reset, rollover);
    let new_month = local_month(now, rollover) > local_month(last_reset, rollover);

    if new_day {
        next.daily_credits = 0;
    }
    if new_month {
        next.monthly_credits = 0;
    }
    if new_day || new_month {
        next.last_credit_reset = Some(now);
    }
    next
}

/// What was taken by one admission, enough to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub tier: SubscriptionTier,
    pub reserved_at: DateTime<Utc>,
    pub previous_generation_time: Option<DateTime<Utc>>,
    pub daily_used: i32,
    pub monthly_used: i32,
    pub credits_remaining: Option<i32>,
    pub next_generation_time: DateTime<Utc>,
}

fn ceil_minutes(wait: Duration) -> i64 {
    let millis = wait.num_milliseconds();
    (millis + 59_999) / 60_000
}

/// The admission decision. On success returns the account to persist and
/// the reservation that was made.
pub fn admit(
    subscription: &Subscription,
    credits: &CreditAccount,
    policy: &CreditPolicy,
    now: DateTime<Utc>,
) -> AppResult<(CreditAccount, Reservation)> {
    let tier = subscription::effective_tier(subscription, now);
    let limits = policy.limits_for(tier);

    if let Some(last) = credits.last_generation_time {
        let next_generation_time = last + limits.cooldown();
        if now < next_generation_time {
            return Err(AppError::CooldownActive {
                remaining_minutes: ceil_minutes(next_generation_time - now),
                next_generation_time,
            });
        }
    }

    let mut account = reconcile_counters(credits, now, policy.rollover());

    if let Some(limit) = limits.daily_limit.filter(|l| account.daily_credits >= *l) {
        return Err(AppError::DailyLimitReached { limit });
    }
    if let Some(limit) = limits.monthly_limit.filter(|l| account.monthly_credits >= *l) {
        return Err(AppError::MonthlyLimitReached { limit });
    }

    account.daily_credits += 1;
    account.monthly_credits += 1;
    account.last_generation_time = Some(now);

    let reservation = Reservation {
        tier,
        reserved_at: now,
        previous_generation_time: credits.last_generation_time,
        daily_used: account.daily_credits,
        monthly_used: account.monthly_credits,
        credits_remaining: limits.remaining(account.daily_credits, account.monthly_credits),
        next_generation_time: now + limits.cooldown(),
    };

    Ok((account, reservation))
}

/// Undoes `reservation` against the current stored account.
///
/// Counters are only decremented while they still belong to the reservation's
/// day or month, and the cooldown anchor is only restored if nothing newer
/// replaced it.
pub fn release_reservation(
    credits: &CreditAccount,
    reservation: &Reservation,
    rollover: FixedOffset,
) -> CreditAccount {
    let mut next = credits.clone();

    if let Some(last_reset) = credits.last_credit_reset {
        if local_date(last_reset, rollover) == local_date(reservation.reserved_at, rollover) {
            next.daily_credits = (next.daily_credits - 1).max(0);
        }
        if local_month(last_reset, rollover) == local_month(reservation.reserved_at, rollover) {
            next.monthly_credits = (next.monthly_credits - 1).max(0);
        }
    }

    if credits.last_generation_time == Some(reservation.reserved_at) {
        next.last_generation_time = reservation.previous_generation_time;
    }

    next
}

// ── Read-only view ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    pub effective_tier: SubscriptionTier,
    pub subscription_state: SubscriptionState,
    pub limits: TierLimits,
    pub daily_credits: i32,
    pub monthly_credits: i32,
    pub credits_remaining: Option<i32>,
    pub next_generation_time: Option<DateTime<Utc>>,
    pub can_generate: bool,
}

pub fn summarize(
    subscription: &Subscription,
    credits: &CreditAccount,
    policy: &CreditPolicy,
    now: DateTime<Utc>,
) -> CreditSummary {
    let tier = subscription::effective_tier(subscription, now);
    let limits = policy.limits_for(tier);
    let account = reconcile_counters(credits, now, policy.rollover());

    let next_generation_time = credits
        .last_generation_time
        .map(|last| last + limits.cooldown())
        .filter(|next| *next > now);

    CreditSummary {
        effective_tier: tier,
        subscription_state: subscription::state_at(subscription, now),
        limits: limits.clone(),
        daily_credits: account.daily_credits,
        monthly_credits: account.monthly_credits,
        credits_remaining: limits.remaining(account.daily_credits, account.monthly_credits),
        next_generation_time,
        can_generate: admit(subscription, credits, policy, now).is_ok(),
    }
}

// ── Generation ───────────────────────────────────────────────────────────────

/// Per-user serialized storage for the gate.
pub trait CreditStore: Send + Sync {
    /// Runs [`admit`] against the user's locked row and persists the result.
    fn reserve(
        &self,
        user_id: Uuid,
        policy: &CreditPolicy,
        now: DateTime<Utc>,
    ) -> impl Future<Output = AppResult<Reservation>> + Send;

    /// Runs [`release_reservation`] against the user's locked row.
    fn release(
        &self,
        user_id: Uuid,
        reservation: &Reservation,
        policy: &CreditPolicy,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn record_signal(&self, signal: &TradingSignal) -> impl Future<Output = AppResult<()>> + Send;
}

#[derive(Debug, Serialize)]
pub struct GenerationOutcome {
    pub signal: TradingSignal,
    pub credits_used: i32,
    pub credits_remaining: Option<i32>,
    pub next_generation_time: DateTime<Utc>,
}

pub async fn generate_signal<S, M>(
    store: &S,
    model: &M,
    policy: &CreditPolicy,
    user_id: Uuid,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> AppResult<GenerationOutcome>
where
    S: CreditStore,
    M: SignalModel,
{
    let reservation = match store.reserve(user_id, policy, now).await {
        Ok(r) => r,
        Err(e) => {
            tracing::info!(user_id = %user_id, reason = e.code(), "Signal generation denied");
            return Err(e);
        }
    };

    let request = SignalRequest {
        timeframe,
        tier: reservation.tier,
    };

    let generated = match model.generate(&request).await {
        Ok(payload) => TradingSignal::from_payload(user_id, timeframe, payload, now),
        Err(e) => Err(AppError::ExternalGenerationFailure(e.to_string())),
    };

    let stored = match generated {
        Ok(signal) => store.record_signal(&signal).await.map(|_| signal),
        Err(e) => Err(e),
    };

    match stored {
        Ok(signal) => {
            tracing::info!(
                user_id = %user_id,
                tier = %reservation.tier,
                signal_id = %signal.id,
                daily_used = reservation.daily_used,
                "Signal generated"
            );
            Ok(GenerationOutcome {
                signal,
                credits_used: reservation.daily_used,
                credits_remaining: reservation.credits_remaining,
                next_generation_time: reservation.next_generation_time,
            })
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Signal generation failed, releasing credit");
            if let Err(release_err) = store.release(user_id, &reservation, policy).await {
                tracing::error!(
                    user_id = %user_id,
                    error = %release_err,
                    "Failed to release reserved credit"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::{SignalDirection, SignalPayload};
    use crate::services::dates::compute_grace_period_end;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn policy() -> CreditPolicy {
        CreditPolicy::standard(FixedOffset::east_opt(0).unwrap())
    }

    fn with_limits(mut policy: CreditPolicy, limits: TierLimits) -> CreditPolicy {
        let i = slot(limits.tier);
        policy.tiers[i] = limits;
        policy
    }

    fn paid(tier: SubscriptionTier, now: DateTime<Utc>) -> Subscription {
        let end = now + Duration::days(20);
        Subscription {
            subscription_tier: tier,
            subscription_start_date: Some(now - Duration::days(10)),
            subscription_end_date: Some(end),
            subscription_period: Some(1),
            grace_period_end_date: Some(compute_grace_period_end(end)),
            is_first_time_subscriber: false,
        }
    }

    #[test]
    fn test_cooldown_reports_remaining_minutes() {
        let now = utc(2026, 3, 1, 12, 0);
        let credits = CreditAccount {
            daily_credits: 1,
            monthly_credits: 1,
            last_credit_reset: Some(now - Duration::minutes(10)),
            last_generation_time: Some(now - Duration::minutes(10)),
        };
        let err = admit(&paid(SubscriptionTier::StarterTrader, now), &credits, &policy(), now).unwrap_err();
        match err {
            AppError::CooldownActive {
                remaining_minutes,
                next_generation_time,
            } => {
                assert_eq!(remaining_minutes, 20);
                assert_eq!(next_generation_time, now + Duration::minutes(20));
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_minute_rounds_up() {
        let now = utc(2026, 3, 1, 12, 0);
        let credits = CreditAccount {
            last_generation_time: Some(now - Duration::minutes(10) - Duration::seconds(30)),
            ..CreditAccount::default()
        };
        let err = admit(&paid(SubscriptionTier::StarterTrader, now), &credits, &policy(), now).unwrap_err();
        assert!(matches!(err, AppError::CooldownActive { remaining_minutes: 20, .. }));
    }

    #[test]
    fn test_free_third_request_hits_daily_limit() {
        let policy = policy();
        let free = Subscription::default();
        let mut credits = CreditAccount::default();
        let mut now = utc(2026, 3, 1, 8, 0);

        for _ in 0..2 {
            let (next, _) = admit(&free, &credits, &policy, now).unwrap();
            credits = next;
            now += Duration::minutes(91);
        }

        let err = admit(&free, &credits, &policy, now).unwrap_err();
        assert!(matches!(err, AppError::DailyLimitReached { limit: 2 }));
        assert_eq!(credits.daily_credits, 2);
    }

    #[test]
    fn test_daily_counter_resets_on_new_day() {
        let policy = policy();
        let free = Subscription::default();
        let credits = CreditAccount {
            daily_credits: 2,
            monthly_credits: 2,
            last_credit_reset: Some(utc(2026, 3, 1, 8, 0)),
            last_generation_time: Some(utc(2026, 3, 1, 20, 0)),
        };

        let now = utc(2026, 3, 2, 0, 5);
        assert!(matches!(
            admit(&free, &credits, &policy, now - Duration::hours(1)),
            Err(AppError::DailyLimitReached { .. })
        ));

        let (next, reservation) = admit(&free, &credits, &policy, now).unwrap();
        assert_eq!(next.daily_credits, 1);
        assert_eq!(next.monthly_credits, 3);
        assert_eq!(next.last_credit_reset, Some(now));
        assert_eq!(reservation.credits_remaining, Some(1));
    }

    #[test]
    fn test_rollover_offset_moves_the_day_boundary() {
        // UTC+5: 20:00Z on the 1st is already the 2nd locally.
        let rollover = FixedOffset::east_opt(5 * 3600).unwrap();
        let credits = CreditAccount {
            daily_credits: 2,
            monthly_credits: 2,
            last_credit_reset: Some(utc(2026, 3, 1, 10, 0)),
            last_generation_time: None,
        };
        let reconciled = reconcile_counters(&credits, utc(2026, 3, 1, 20, 0), rollover);
        assert_eq!(reconciled.daily_credits, 0);
        let same_day = reconcile_counters(&credits, utc(2026, 3, 1, 18, 0), rollover);
        assert_eq!(same_day.daily_credits, 2);
    }

    #[test]
    fn test_monthly_limit_and_reset() {
        let policy = policy();
        let free = Subscription::default();
        let credits = CreditAccount {
            daily_credits: 0,
            monthly_credits: 10,
            last_credit_reset: Some(utc(2026, 3, 30, 0, 0)),
            last_generation_time: Some(utc(2026, 3, 30, 9, 0)),
        };

        let err = admit(&free, &credits, &policy, utc(2026, 3, 31, 9, 0)).unwrap_err();
        assert!(matches!(err, AppError::MonthlyLimitReached { limit: 10 }));

        let (next, _) = admit(&free, &credits, &policy, utc(2026, 4, 1, 9, 0)).unwrap();
        assert_eq!(next.monthly_credits, 1);
        assert_eq!(next.daily_credits, 1);
    }

    #[test]
    fn test_lapsed_subscription_is_gated_as_free() {
        let now = utc(2026, 3, 1, 12, 0);
        let mut sub = paid(SubscriptionTier::ProTrader, now);
        sub.subscription_end_date = Some(now - Duration::days(5));
        sub.grace_period_end_date = sub.subscription_end_date.map(compute_grace_period_end);

        let credits = CreditAccount {
            daily_credits: 2,
            monthly_credits: 4,
            last_credit_reset: Some(now - Duration::hours(2)),
            last_generation_time: Some(now - Duration::minutes(100)),
        };
        assert!(matches!(
            admit(&sub, &credits, &policy(), now),
            Err(AppError::DailyLimitReached { limit: 2 })
        ));
    }

    #[test]
    fn test_unlimited_tiers() {
        let now = utc(2026, 3, 1, 12, 0);
        let admin = Subscription {
            subscription_tier: SubscriptionTier::Admin,
            ..Subscription::default()
        };
        let credits = CreditAccount {
            daily_credits: 500,
            monthly_credits: 5000,
            last_credit_reset: Some(now),
            last_generation_time: Some(now),
        };
        let (_, reservation) = admit(&admin, &credits, &policy(), now).unwrap();
        assert_eq!(reservation.credits_remaining, None);
        assert_eq!(reservation.next_generation_time, now);
    }

    #[test]
    fn test_release_restores_previous_state() {
        let policy = policy();
        let now = utc(2026, 3, 1, 12, 0);
        let before = CreditAccount {
            daily_credits: 1,
            monthly_credits: 3,
            last_credit_reset: Some(utc(2026, 3, 1, 7, 0)),
            last_generation_time: Some(now - Duration::hours(2)),
        };
        let (after, reservation) = admit(&Subscription::default(), &before, &policy, now).unwrap();
        let restored = release_reservation(&after, &reservation, policy.rollover());
        assert_eq!(restored, before);
    }

    #[test]
    fn test_release_after_daily_reset_keeps_new_day_counters() {
        let policy = policy();
        let now = utc(2026, 3, 1, 23, 0);
        let (after, reservation) =
            admit(&Subscription::default(), &CreditAccount::default(), &policy, now).unwrap();

        // Another day's generation has already reset the daily counter.
        let later = CreditAccount {
            daily_credits: 1,
            monthly_credits: after.monthly_credits + 1,
            last_credit_reset: Some(utc(2026, 3, 2, 1, 0)),
            last_generation_time: Some(utc(2026, 3, 2, 1, 0)),
        };
        let released = release_reservation(&later, &reservation, policy.rollover());
        assert_eq!(released.daily_credits, 1);
        assert_eq!(released.monthly_credits, 1);
        assert_eq!(released.last_generation_time, later.last_generation_time);
    }

    #[test]
    fn test_summary_matches_gate() {
        let policy = policy();
        let now = utc(2026, 3, 1, 12, 0);
        let credits = CreditAccount {
            daily_credits: 1,
            monthly_credits: 1,
            last_credit_reset: Some(now - Duration::hours(1)),
            last_generation_time: Some(now - Duration::minutes(30)),
        };
        let summary = summarize(&Subscription::default(), &credits, &policy, now);
        assert_eq!(summary.effective_tier, SubscriptionTier::Free);
        assert_eq!(summary.credits_remaining, Some(1));
        assert_eq!(summary.next_generation_time, Some(now + Duration::minutes(60)));
        assert!(!summary.can_generate);
    }

    // ── In-memory store ──────────────────────────────────────────────────

    #[derive(Default)]
    struct MemoryStore {
        accounts: Mutex<HashMap<Uuid, Arc<Mutex<(Subscription, CreditAccount)>>>>,
        signals: Mutex<Vec<TradingSignal>>,
    }

    impl MemoryStore {
        async fn insert(&self, user_id: Uuid, sub: Subscription, credits: CreditAccount) {
            self.accounts
                .lock()
                .await
                .insert(user_id, Arc::new(Mutex::new((sub, credits))));
        }

        async fn row(&self, user_id: Uuid) -> AppResult<Arc<Mutex<(Subscription, CreditAccount)>>> {
            self.accounts
                .lock()
                .await
                .get(&user_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound("User not found".into()))
        }

        async fn credits(&self, user_id: Uuid) -> CreditAccount {
            self.row(user_id).await.unwrap().lock().await.1.clone()
        }
    }

    impl CreditStore for MemoryStore {
        async fn reserve(
            &self,
            user_id: Uuid,
            policy: &CreditPolicy,
            now: DateTime<Utc>,
        ) -> AppResult<Reservation> {
            let row = self.row(user_id).await?;
            let mut guard = row.lock().await;
            // Give other tasks a chance to contend for the row.
            tokio::task::yield_now().await;
            let (account, reservation) = admit(&guard.0, &guard.1, policy, now)?;
            guard.1 = account;
            Ok(reservation)
        }

        async fn release(
            &self,
            user_id: Uuid,
            reservation: &Reservation,
            policy: &CreditPolicy,
        ) -> AppResult<()> {
            let row = self.row(user_id).await?;
            let mut guard = row.lock().await;
            guard.1 = release_reservation(&guard.1, reservation, policy.rollover());
            Ok(())
        }

        async fn record_signal(&self, signal: &TradingSignal) -> AppResult<()> {
            self.signals.lock().await.push(signal.clone());
            Ok(())
        }
    }

    struct StubModel {
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SignalModel for StubModel {
        async fn generate(&self, _request: &SignalRequest) -> anyhow::Result<SignalPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                anyhow::bail!("model timed out");
            }
            Ok(SignalPayload {
                symbol: "EURUSD".into(),
                direction: SignalDirection::Long,
                entry_price: 1.0850,
                stop_loss: 1.0800,
                take_profits: vec![1.0950, 1.0900],
                rationale: None,
            })
        }
    }

    #[tokio::test]
    async fn test_parallel_requests_never_double_spend() {
        let policy = Arc::new(with_limits(
            policy(),
            TierLimits {
                tier: SubscriptionTier::Free,
                daily_limit: Some(2),
                monthly_limit: Some(10),
                cooldown_minutes: 0,
            },
        ));
        let store = Arc::new(MemoryStore::default());
        let model = Arc::new(StubModel::new(false));
        let user_id = Uuid::new_v4();
        store
            .insert(user_id, Subscription::default(), CreditAccount::default())
            .await;

        let now = utc(2026, 3, 1, 12, 0);
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let (store, model, policy) = (store.clone(), model.clone(), policy.clone());
            set.spawn(async move {
                generate_signal(&*store, &*model, &policy, user_id, Timeframe::H1, now).await
            });
        }

        let mut committed = 0;
        let mut denied = 0;
        while let Some(joined) = set.join_next().await {
            match joined.unwrap() {
                Ok(_) => committed += 1,
                Err(AppError::DailyLimitReached { limit: 2 }) => denied += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(committed, 2);
        assert_eq!(denied, 48);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.signals.lock().await.len(), 2);
        assert_eq!(store.credits(user_id).await.daily_credits, 2);
    }

    #[tokio::test]
    async fn test_model_failure_refunds_credit_and_cooldown() {
        let policy = policy();
        let store = MemoryStore::default();
        let model = StubModel::new(true);
        let user_id = Uuid::new_v4();
        let now = utc(2026, 3, 1, 12, 0);
        let before = CreditAccount {
            daily_credits: 1,
            monthly_credits: 1,
            last_credit_reset: Some(utc(2026, 3, 1, 8, 0)),
            last_generation_time: Some(utc(2026, 3, 1, 8, 0)),
        };
        store.insert(user_id, Subscription::default(), before.clone()).await;

        let err = generate_signal(&store, &model, &policy, user_id, Timeframe::M15, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalGenerationFailure(_)));
        assert!(err.is_retryable());
        assert_eq!(store.credits(user_id).await, before);
        assert!(store.signals.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_successful_generation_reports_credits() {
        let policy = policy();
        let store = MemoryStore::default();
        let model = StubModel::new(false);
        let user_id = Uuid::new_v4();
        let now = utc(2026, 3, 1, 12, 0);
        store
            .insert(user_id, paid(SubscriptionTier::StarterTrader, now), CreditAccount::default())
            .await;

        let outcome = generate_signal(&store, &model, &policy, user_id, Timeframe::H4, now)
            .await
            .unwrap();
        assert_eq!(outcome.credits_used, 1);
        assert_eq!(outcome.credits_remaining, Some(9));
        assert_eq!(outcome.next_generation_time, now + Duration::minutes(30));
        assert_eq!(outcome.signal.timeframe, "4h");
        assert_eq!(outcome.signal.take_profits.0[0].price, 1.0900);

        let err = generate_signal(&store, &model, &policy, user_id, Timeframe::H4, now + Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CooldownActive { remaining_minutes: 25, .. }));
    }
}
