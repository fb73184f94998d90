use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::dto::{ConfirmPaymentResponse, PaymentRequestQuery, SubscriptionResponse, UpdateSignalStatusRequest};
use crate::error::{AppError, AppResult};
use crate::models::payment_request::{PaymentRequest, PaymentStatus};
use crate::models::signal::TradingSignal;
use crate::models::user::{Subscription, SubscriptionTier};
use crate::services::challenge::{self, DiscountClaim};
use crate::services::dates::compute_grace_period_end;
use crate::services::pricing::BillingPeriod;
use crate::services::reference::is_reference_code;
use crate::services::subscription::renewal_window;
use crate::AppState;

// ── Payment requests ─────────────────────────────────────────────────────────

pub async fn list_payment_requests(
    State(state): State<AppState>,
    Query(query): Query<PaymentRequestQuery>,
) -> AppResult<Json<Vec<PaymentRequest>>> {
    let reference = query
        .reference
        .map(|r| r.trim().to_uppercase())
        .filter(|r| !r.is_empty());
    if let Some(code) = reference.as_deref().filter(|r| !is_reference_code(r)) {
        return Err(AppError::InvalidArgument(format!("'{}' is not a reference code", code)));
    }

    let requests = sqlx::query_as::<_, PaymentRequest>(
        r#"
        SELECT * FROM payment_requests
        WHERE ($1::payment_status IS NULL OR status = $1)
          AND ($2::text IS NULL OR reference_code = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(query.status)
    .bind(reference)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(requests))
}

async fn lock_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_id: Uuid,
) -> AppResult<PaymentRequest> {
    let request = sqlx::query_as::<_, PaymentRequest>(
        "SELECT * FROM payment_requests WHERE id = $1 FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("Payment request not found".into()))?;

    request.check_resolvable()?;
    Ok(request)
}

async fn resolve(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_id: Uuid,
    status: PaymentStatus,
    admin_id: Uuid,
) -> AppResult<PaymentRequest> {
    let request = sqlx::query_as::<_, PaymentRequest>(
        r#"
        UPDATE payment_requests
        SET status = $2, resolved_at = NOW(), resolved_by = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(request_id)
    .bind(status)
    .bind(admin_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(request)
}

/// The only path that writes a paid tier onto a user.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<ConfirmPaymentResponse>> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let request = lock_pending(&mut tx, request_id).await?;
    let period = BillingPeriod::try_from(request.period)?;

    let current = sqlx::query_as::<_, Subscription>(
        r#"
        SELECT subscription_tier, subscription_start_date, subscription_end_date,
               subscription_period, grace_period_end_date, is_first_time_subscriber
        FROM users WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(request.user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User not found".into()))?;

    if current.subscription_tier == SubscriptionTier::Admin {
        return Err(AppError::Conflict("Admin accounts are not subscription-managed".into()));
    }
    request.check_first_time_eligible(current.is_first_time_subscriber)?;

    let window = renewal_window(&current, request.plan, period.months(), now)?;
    let limits = state.policy.limits_for(request.plan);

    let subscription = sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE users SET
            subscription_tier = $2,
            subscription_start_date = $3,
            subscription_end_date = $4,
            subscription_period = $5,
            grace_period_end_date = $6,
            is_first_time_subscriber = false,
            max_daily_credits = $7,
            max_monthly_credits = $8,
            updated_at = NOW()
        WHERE id = $1
        RETURNING subscription_tier, subscription_start_date, subscription_end_date,
                  subscription_period, grace_period_end_date, is_first_time_subscriber
        "#,
    )
    .bind(request.user_id)
    .bind(request.plan)
    .bind(window.start)
    .bind(window.end)
    .bind(request.period)
    .bind(compute_grace_period_end(window.end))
    .bind(limits.daily_limit)
    .bind(limits.monthly_limit)
    .fetch_one(&mut *tx)
    .await?;

    let request = resolve(&mut tx, request_id, PaymentStatus::Completed, admin.id).await?;
    tx.commit().await?;

    tracing::info!(
        admin_id = %admin.id,
        user_id = %request.user_id,
        reference_code = %request.reference_code,
        plan = %request.plan,
        subscription_end = %window.end,
        "Payment confirmed, subscription applied"
    );

    Ok(Json(ConfirmPaymentResponse {
        user_id: request.user_id,
        subscription: SubscriptionResponse::build(&subscription, now),
        payment_request: request,
    }))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<PaymentRequest>> {
    let mut tx = state.db.begin().await?;
    lock_pending(&mut tx, request_id).await?;
    let request = resolve(&mut tx, request_id, PaymentStatus::Cancelled, admin.id).await?;
    tx.commit().await?;

    tracing::info!(
        admin_id = %admin.id,
        reference_code = %request.reference_code,
        "Payment request cancelled"
    );
    Ok(Json(request))
}

// ── Signals ──────────────────────────────────────────────────────────────────

/// Driven by the market tracker: fresh -> active -> closed | stopped.
pub async fn update_signal_status(
    State(state): State<AppState>,
    Path(signal_id): Path<Uuid>,
    Json(body): Json<UpdateSignalStatusRequest>,
) -> AppResult<Json<TradingSignal>> {
    let mut tx = state.db.begin().await?;

    let current = sqlx::query_as::<_, TradingSignal>(
        "SELECT * FROM trading_signals WHERE id = $1 FOR UPDATE",
    )
    .bind(signal_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Signal not found".into()))?;

    if !current.status.can_transition_to(body.status) {
        return Err(AppError::Conflict(format!(
            "Signal cannot move from {:?} to {:?}",
            current.status, body.status
        )));
    }

    let signal = sqlx::query_as::<_, TradingSignal>(
        r#"
        UPDATE trading_signals
        SET status = $2, status_changed_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(signal_id)
    .bind(body.status)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::debug!(signal_id = %signal_id, status = ?signal.status, "Signal status updated");
    Ok(Json(signal))
}

// ── Discount codes ───────────────────────────────────────────────────────────

pub async fn consume_discount(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<DiscountClaim>> {
    Ok(Json(challenge::consume_discount(&state.db, user_id).await?))
}
