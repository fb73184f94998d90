use axum::{extract::State, Extension, Json};
use chrono::Utc;

use crate::auth::middleware::AuthUser;
use crate::dto::SubscriptionResponse;
use crate::error::AppResult;
use crate::services::credits::{summarize, CreditSummary, TierLimits};
use crate::AppState;

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<SubscriptionResponse>> {
    let user = super::load_user(&state.db, auth_user.id).await?;
    Ok(Json(SubscriptionResponse::build(&user.subscription, Utc::now())))
}

/// Read-only: counters are reconciled in the response, not written back.
pub async fn get_credits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<CreditSummary>> {
    let user = super::load_user(&state.db, auth_user.id).await?;
    Ok(Json(summarize(
        &user.subscription,
        &user.credits,
        &state.policy,
        Utc::now(),
    )))
}

pub async fn list_tiers(State(state): State<AppState>) -> Json<Vec<TierLimits>> {
    Json(state.policy.tiers().to_vec())
}
