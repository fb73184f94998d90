use axum::{extract::State, Extension, Json};
use chrono::Utc;

use crate::auth::middleware::AuthUser;
use crate::error::AppResult;
use crate::services::challenge::{self, ChallengeProgress, DiscountClaim};
use crate::AppState;

pub async fn get_challenge(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<ChallengeProgress>> {
    let progress =
        challenge::refresh(&state.db, auth_user.id, state.policy.rollover(), Utc::now()).await?;
    Ok(Json(progress))
}

pub async fn claim_discount(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<DiscountClaim>> {
    Ok(Json(challenge::claim_discount(&state.db, auth_user.id).await?))
}
