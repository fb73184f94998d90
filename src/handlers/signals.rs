use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::dto::{
    validated, GenerateSignalRequest, ReportOutcomeRequest, ReportOutcomeResponse, SignalListQuery,
};
use crate::error::{AppError, AppResult};
use crate::models::signal::TradingSignal;
use crate::services::challenge;
use crate::services::credits::{self, GenerationOutcome};
use crate::AppState;

const DEFAULT_PAGE: i64 = 50;

pub async fn generate_signal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<GenerateSignalRequest>,
) -> AppResult<Json<GenerationOutcome>> {
    let outcome = credits::generate_signal(
        &state.credit_store,
        state.signal_model.as_ref(),
        &state.policy,
        auth_user.id,
        body.timeframe,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn list_signals(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<SignalListQuery>,
) -> AppResult<Json<Vec<TradingSignal>>> {
    let query = validated(query)?;
    let signals = sqlx::query_as::<_, TradingSignal>(
        r#"
        SELECT * FROM trading_signals
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(auth_user.id)
    .bind(query.limit.unwrap_or(DEFAULT_PAGE))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(signals))
}

pub async fn report_outcome(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(signal_id): Path<Uuid>,
    Json(body): Json<ReportOutcomeRequest>,
) -> AppResult<Json<ReportOutcomeResponse>> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let signal = sqlx::query_as::<_, TradingSignal>(
        "SELECT * FROM trading_signals WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(signal_id)
    .bind(auth_user.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Signal not found".into()))?;

    signal.check_outcome_report(body.outcome)?;

    let signal = sqlx::query_as::<_, TradingSignal>(
        r#"
        UPDATE trading_signals
        SET user_action = $2, outcome_reported_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(signal_id)
    .bind(body.outcome)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %auth_user.id,
        signal_id = %signal_id,
        outcome = ?body.outcome,
        "Signal outcome reported"
    );

    let challenge = challenge::refresh(&state.db, auth_user.id, state.policy.rollover(), now).await?;
    Ok(Json(ReportOutcomeResponse { signal, challenge }))
}
