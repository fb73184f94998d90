//! Monthly review challenge.
//!
//! A user who has reported an outcome for every closed signal of the current
//! billing cycle, before the cycle ends, earns one loyalty discount code for
//! that cycle.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::user::{ChallengeState, Subscription};
use crate::services::dates::local_month_start;
use crate::services::reference::random_hex;
use crate::services::subscription;

pub const LOYALTY_DISCOUNT_PERCENT: u32 = 6;

const DISCOUNT_CODE_PREFIX: &str = "LOYAL6-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingCycle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingCycle {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn overlaps(&self, other: &BillingCycle) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The cycle the latest code was issued for.
fn rewarded_cycle(state: &ChallengeState) -> Option<BillingCycle> {
    let start = state.discount_cycle_start?;
    let end = state
        .discount_cycle_end
        .or_else(|| start.checked_add_months(Months::new(1)))?;
    Some(BillingCycle { start, end })
}

/// Month-aligned window anchored on the subscription start for users with
/// paid access, the local calendar month otherwise.
pub fn billing_cycle(sub: &Subscription, now: DateTime<Utc>, rollover: FixedOffset) -> BillingCycle {
    let anchor = sub
        .subscription_start_date
        .filter(|start| *start <= now)
        .filter(|_| subscription::state_at(sub, now).has_paid_access());

    match anchor.and_then(|start| anchored_cycle(start, now)) {
        Some(cycle) => cycle,
        None => calendar_cycle(now, rollover),
    }
}

fn anchored_cycle(anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<BillingCycle> {
    let nth = |k: u32| anchor.checked_add_months(Months::new(k));

    // Offsets are always taken from the anchor so short months do not drift the cycle.
    let mut k = months_between(anchor, now);
    while k > 0 && nth(k)? > now {
        k -= 1;
    }
    while nth(k + 1)? <= now {
        k += 1;
    }

    Some(BillingCycle {
        start: nth(k)?,
        end: nth(k + 1)?,
    })
}

fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    months.max(0) as u32
}

fn calendar_cycle(now: DateTime<Utc>, rollover: FixedOffset) -> BillingCycle {
    let start = local_month_start(now, rollover);
    let end = start
        .with_timezone(&rollover)
        .checked_add_months(Months::new(1))
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(start + Duration::days(31));
    BillingCycle { start, end }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeProgress {
    pub cycle: BillingCycle,
    pub closed_signals: i64,
    pub reviewed_signals: i64,
    pub completion_ratio: f64,
    pub completed: bool,
    pub discount_percent: u32,
    pub monthly_completion_streak: i32,
    pub pending_discount_code: Option<String>,
    pub consumed_discount_code: Option<String>,
}

pub fn generate_discount_code() -> String {
    format!("{}{}", DISCOUNT_CODE_PREFIX, random_hex(3))
}

fn ratio(closed: i64, reviewed: i64) -> f64 {
    if closed == 0 {
        0.0
    } else {
        reviewed as f64 / closed as f64
    }
}

/// Returns the state to persist when a code should be issued now.
pub fn evaluate(
    state: &ChallengeState,
    cycle: &BillingCycle,
    closed: i64,
    reviewed: i64,
    now: DateTime<Utc>,
) -> Option<ChallengeState> {
    let complete = closed > 0 && reviewed >= closed;
    let previous = rewarded_cycle(state);
    // Cycle definitions change on upgrade, so any overlap counts as the same cycle.
    let already_issued = previous.is_some_and(|prev| prev.overlaps(cycle));
    if !complete || already_issued || !cycle.contains(now) {
        return None;
    }

    let consecutive = previous.is_some_and(|prev| prev.end == cycle.start);

    Some(ChallengeState {
        monthly_completion_streak: if consecutive {
            state.monthly_completion_streak + 1
        } else {
            1
        },
        pending_discount_code: Some(generate_discount_code()),
        consumed_discount_code: state.consumed_discount_code.clone(),
        discount_cycle_start: Some(cycle.start),
        discount_cycle_end: Some(cycle.end),
    })
}

pub fn progress(
    state: &ChallengeState,
    cycle: BillingCycle,
    closed: i64,
    reviewed: i64,
) -> ChallengeProgress {
    ChallengeProgress {
        cycle,
        closed_signals: closed,
        reviewed_signals: reviewed,
        completion_ratio: ratio(closed, reviewed),
        completed: closed > 0 && reviewed >= closed,
        discount_percent: LOYALTY_DISCOUNT_PERCENT,
        monthly_completion_streak: state.monthly_completion_streak,
        pending_discount_code: state.pending_discount_code.clone(),
        consumed_discount_code: state.consumed_discount_code.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum DiscountClaim {
    Pending(String),
    Consumed(String),
}

/// Claiming never mutates state, so repeated claims return the same code.
pub fn claim(state: &ChallengeState) -> AppResult<DiscountClaim> {
    if let Some(code) = &state.pending_discount_code {
        return Ok(DiscountClaim::Pending(code.clone()));
    }
    if let Some(code) = &state.consumed_discount_code {
        return Ok(DiscountClaim::Consumed(code.clone()));
    }
    Err(AppError::NotFound("No discount code has been earned".into()))
}

/// The external acknowledgment that the code was redeemed.
pub fn consume(state: &ChallengeState) -> AppResult<ChallengeState> {
    match &state.pending_discount_code {
        Some(code) => Ok(ChallengeState {
            pending_discount_code: None,
            consumed_discount_code: Some(code.clone()),
            ..state.clone()
        }),
        None if state.consumed_discount_code.is_some() => Ok(state.clone()),
        None => Err(AppError::NotFound("No pending discount code".into())),
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct ChallengeRow {
    #[sqlx(flatten)]
    subscription: Subscription,
    #[sqlx(flatten)]
    challenge: ChallengeState,
}

#[derive(Debug, FromRow)]
struct ReviewCounts {
    closed: i64,
    reviewed: i64,
}

async fn load_locked(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> AppResult<ChallengeRow> {
    sqlx::query_as::<_, ChallengeRow>(
        r#"
        SELECT subscription_tier, subscription_start_date, subscription_end_date,
               subscription_period, grace_period_end_date, is_first_time_subscriber,
               monthly_completion_streak, pending_discount_code, consumed_discount_code,
               discount_cycle_start, discount_cycle_end
        FROM users WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("User not found".into()))
}

async fn save(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    state: &ChallengeState,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE users SET
            monthly_completion_streak = $2,
            pending_discount_code = $3,
            consumed_discount_code = $4,
            discount_cycle_start = $5,
            discount_cycle_end = $6,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(state.monthly_completion_streak)
    .bind(&state.pending_discount_code)
    .bind(&state.consumed_discount_code)
    .bind(state.discount_cycle_start)
    .bind(state.discount_cycle_end)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Recomputes progress for the current cycle and issues the code if earned.
pub async fn refresh(
    db: &PgPool,
    user_id: Uuid,
    rollover: FixedOffset,
    now: DateTime<Utc>,
) -> AppResult<ChallengeProgress> {
    let mut tx = db.begin().await?;
    let row = load_locked(&mut tx, user_id).await?;
    let cycle = billing_cycle(&row.subscription, now, rollover);

    let counts = sqlx::query_as::<_, ReviewCounts>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'closed') AS closed,
            COUNT(*) FILTER (WHERE status = 'closed' AND user_action <> 'pending') AS reviewed
        FROM trading_signals
        WHERE user_id = $1 AND created_at >= $2 AND created_at < $3
        "#,
    )
    .bind(user_id)
    .bind(cycle.start)
    .bind(cycle.end)
    .fetch_one(&mut *tx)
    .await?;

    let state = match evaluate(&row.challenge, &cycle, counts.closed, counts.reviewed, now) {
        Some(issued) => {
            save(&mut tx, user_id, &issued).await?;
            tracing::info!(
                user_id = %user_id,
                streak = issued.monthly_completion_streak,
                cycle_start = %cycle.start,
                "Review challenge completed, discount code issued"
            );
            issued
        }
        None => row.challenge,
    };
    tx.commit().await?;

    Ok(progress(&state, cycle, counts.closed, counts.reviewed))
}

pub async fn claim_discount(db: &PgPool, user_id: Uuid) -> AppResult<DiscountClaim> {
    let state = sqlx::query_as::<_, ChallengeState>(
        r#"
        SELECT monthly_completion_streak, pending_discount_code, consumed_discount_code,
               discount_cycle_start, discount_cycle_end
        FROM users WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound("User not found".into()))?;

    claim(&state)
}

pub async fn consume_discount(db: &PgPool, user_id: Uuid) -> AppResult<DiscountClaim> {
    let mut tx = db.begin().await?;
    let row = load_locked(&mut tx, user_id).await?;
    let consumed = consume(&row.challenge)?;
    if consumed != row.challenge {
        save(&mut tx, user_id, &consumed).await?;
        tracing::info!(user_id = %user_id, "Discount code consumed");
    }
    tx.commit().await?;
    claim(&consumed)
}
