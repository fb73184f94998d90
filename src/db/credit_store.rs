use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::signal::TradingSignal;
use crate::models::user::{CreditAccount, Subscription};
use crate::services::credits::{admit, release_reservation, CreditPolicy, CreditStore, Reservation};

/// Serializes a user's gate decisions on their row lock. Waiting longer than
/// `lock_timeout_ms` fails the request with a concurrency conflict.
#[derive(Clone)]
pub struct PgCreditStore {
    db: PgPool,
    lock_timeout_ms: u64,
}

#[derive(Debug, FromRow)]
struct GateRow {
    #[sqlx(flatten)]
    subscription: Subscription,
    #[sqlx(flatten)]
    credits: CreditAccount,
}

impl PgCreditStore {
    pub fn new(db: PgPool, lock_timeout_ms: u64) -> Self {
        Self { db, lock_timeout_ms }
    }

    async fn lock_row(&self, tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> AppResult<GateRow> {
        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut **tx)
            .await?;

        sqlx::query_as::<_, GateRow>(
            r#"
            SELECT subscription_tier, subscription_start_date, subscription_end_date,
                   subscription_period, grace_period_end_date, is_first_time_subscriber,
                   daily_credits, monthly_credits, last_credit_reset, last_generation_time
            FROM users WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("User not found".into()))
    }

    async fn write_credits(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        credits: &CreditAccount,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                daily_credits = $2,
                monthly_credits = $3,
                last_credit_reset = $4,
                last_generation_time = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(credits.daily_credits)
        .bind(credits.monthly_credits)
        .bind(credits.last_credit_reset)
        .bind(credits.last_generation_time)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

impl CreditStore for PgCreditStore {
    async fn reserve(
        &self,
        user_id: Uuid,
        policy: &CreditPolicy,
        now: DateTime<Utc>,
    ) -> AppResult<Reservation> {
        let mut tx = self.db.begin().await?;
        let row = self.lock_row(&mut tx, user_id).await?;

        // A denial drops the transaction, which rolls back and frees the row.
        let (account, reservation) = admit(&row.subscription, &row.credits, policy, now)?;

        Self::write_credits(&mut tx, user_id, &account).await?;
        tx.commit().await?;

        tracing::debug!(
            user_id = %user_id,
            tier = %reservation.tier,
            daily_used = reservation.daily_used,
            monthly_used = reservation.monthly_used,
            "Credit reserved"
        );
        Ok(reservation)
    }

    async fn release(
        &self,
        user_id: Uuid,
        reservation: &Reservation,
        policy: &CreditPolicy,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let row = self.lock_row(&mut tx, user_id).await?;
        let account = release_reservation(&row.credits, reservation, policy.rollover());
        if account != row.credits {
            Self::write_credits(&mut tx, user_id, &account).await?;
        }
        tx.commit().await?;

        tracing::warn!(
            user_id = %user_id,
            reserved_at = %reservation.reserved_at,
            "Credit reservation released"
        );
        Ok(())
    }

    async fn record_signal(&self, signal: &TradingSignal) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_signals
                (id, user_id, symbol, timeframe, direction, entry_price, stop_loss,
                 take_profits, rationale, status, user_action, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(signal.id)
        .bind(signal.user_id)
        .bind(&signal.symbol)
        .bind(&signal.timeframe)
        .bind(signal.direction)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(&signal.take_profits)
        .bind(&signal.rationale)
        .bind(signal.status)
        .bind(signal.user_action)
        .bind(signal.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
