use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;

use crate::auth::middleware::AuthUser;
use crate::dto::{PaymentRequestResponse, PlanSelection};
use crate::error::{AppError, AppResult};
use crate::models::payment_request::PaymentRequest;
use crate::models::user::SubscriptionTier;
use crate::services::pricing::{compute_price, Pricing};
use crate::services::reference::{confirmation_link, confirmation_message, generate_reference_code};
use crate::AppState;

async fn insert_payment_request(
    db: &sqlx::PgPool,
    request: &PaymentRequest,
) -> Result<PaymentRequest, sqlx::Error> {
    sqlx::query_as::<_, PaymentRequest>(
        r#"
        INSERT INTO payment_requests
            (id, user_id, plan, period, reference_code, original_amount, amount,
             discount_percentage, period_discount, first_time_discount, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(request.id)
    .bind(request.user_id)
    .bind(request.plan)
    .bind(request.period)
    .bind(&request.reference_code)
    .bind(request.original_amount)
    .bind(request.amount)
    .bind(request.discount_percentage)
    .bind(request.period_discount)
    .bind(request.first_time_discount)
    .bind(request.status)
    .bind(request.created_at)
    .fetch_one(db)
    .await
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub async fn create_payment_request(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<PlanSelection>,
) -> AppResult<Json<PaymentRequestResponse>> {
    let user = super::load_user(&state.db, auth_user.id).await?;
    if user.subscription.subscription_tier == SubscriptionTier::Admin {
        return Err(AppError::Conflict("Admin accounts cannot purchase a plan".into()));
    }

    let pricing = compute_price(body.plan, body.period, user.subscription.is_first_time_subscriber)?;
    let mut request = PaymentRequest::new(user.id, generate_reference_code(), &pricing, Utc::now());

    let stored = match insert_payment_request(&state.db, &request).await {
        Err(e) if is_unique_violation(&e) => {
            tracing::warn!(reference_code = %request.reference_code, "Reference code collision, regenerating");
            request.reference_code = generate_reference_code();
            insert_payment_request(&state.db, &request).await?
        }
        other => other?,
    };

    tracing::info!(
        user_id = %user.id,
        reference_code = %stored.reference_code,
        plan = %stored.plan,
        period = stored.period,
        amount = %stored.amount,
        savings = %pricing.savings(),
        "Payment request created"
    );

    let message = confirmation_message(&stored);
    Ok(Json(PaymentRequestResponse {
        confirmation_link: confirmation_link(&state.config.payment_contact_number, &message),
        confirmation_message: message,
        payment_request: stored,
        pricing,
    }))
}

pub async fn list_payment_requests(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<PaymentRequest>>> {
    let requests = sqlx::query_as::<_, PaymentRequest>(
        "SELECT * FROM payment_requests WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(auth_user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(requests))
}

/// Quote for the caller without creating a request.
pub async fn get_pricing(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(selection): Query<PlanSelection>,
) -> AppResult<Json<Pricing>> {
    let is_first_time = sqlx::query_scalar::<_, bool>(
        "SELECT is_first_time_subscriber FROM users WHERE id = $1",
    )
    .bind(auth_user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("User not found".into()))?;

    Ok(Json(compute_price(selection.plan, selection.period, is_first_time)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }
}
