use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Signal generation is cooling down, try again in {remaining_minutes} minute(s)")]
    CooldownActive {
        remaining_minutes: i64,
        next_generation_time: DateTime<Utc>,
    },

    #[error("Daily signal limit of {limit} reached, credits reset tomorrow")]
    DailyLimitReached { limit: i32 },

    #[error("Monthly signal limit of {limit} reached, credits reset next month")]
    MonthlyLimitReached { limit: i32 },

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Another request for this account is in progress, retry")]
    ConcurrencyConflict,

    #[error("Signal generation failed: {0}")]
    ExternalGenerationFailure(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

// Lock contention surfaces as a retryable conflict instead of a 500.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if matches!(db_err.code().as_deref(), Some("55P03" | "40001" | "40P01")) {
                return AppError::ConcurrencyConflict;
            }
        }
        AppError::Database(e)
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::CooldownActive { .. } => "cooldown_active",
            AppError::DailyLimitReached { .. } => "daily_limit_reached",
            AppError::MonthlyLimitReached { .. } => "monthly_limit_reached",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::ConcurrencyConflict => "concurrency_conflict",
            AppError::ExternalGenerationFailure(_) => "external_generation_failure",
            AppError::RateLimited => "rate_limited",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CooldownActive { .. }
            | AppError::DailyLimitReached { .. }
            | AppError::MonthlyLimitReached { .. }
            | AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::ConcurrencyConflict => StatusCode::CONFLICT,
            AppError::ExternalGenerationFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client can succeed by retrying later without operator help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::CooldownActive { .. }
                | AppError::DailyLimitReached { .. }
                | AppError::MonthlyLimitReached { .. }
                | AppError::ConcurrencyConflict
                | AppError::ExternalGenerationFailure(_)
                | AppError::RateLimited
        )
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::CooldownActive {
                remaining_minutes,
                next_generation_time,
            } => Some(json!({
                "remaining_minutes": remaining_minutes,
                "next_generation_time": next_generation_time,
            })),
            AppError::DailyLimitReached { limit } | AppError::MonthlyLimitReached { limit } => {
                Some(json!({ "limit": limit }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::NotFound(msg) | AppError::Conflict(msg) | AppError::InvalidArgument(msg) => {
                msg.clone()
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Internal server error".into()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                "Internal server error".into()
            }
            _ => self.to_string(),
        };

        let mut error = json!({
            "code": self.code(),
            "message": message,
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn cooldown_response_carries_resume_time() {
        let next = DateTime::parse_from_rfc3339("2026-03-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (status, body) = body_json(AppError::CooldownActive {
            remaining_minutes: 20,
            next_generation_time: next,
        })
        .await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "cooldown_active");
        assert_eq!(body["error"]["details"]["remaining_minutes"], 20);
        assert_eq!(body["error"]["details"]["next_generation_time"], "2026-03-01T10:30:00Z");
        assert_eq!(body["error"]["retryable"], true);
    }

    #[tokio::test]
    async fn daily_limit_response_has_message() {
        let (status, body) = body_json(AppError::DailyLimitReached { limit: 2 }).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "daily_limit_reached");
        assert!(body["error"]["message"].as_str().unwrap().contains("2"));
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("secret dsn"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "Internal server error");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[test]
    fn invalid_argument_maps_to_422() {
        let err = AppError::InvalidArgument("period must be 1, 3 or 12".into());
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!err.is_retryable());
    }

    #[test]
    fn concurrency_conflict_is_retryable_409() {
        assert_eq!(AppError::ConcurrencyConflict.status(), StatusCode::CONFLICT);
        assert!(AppError::ConcurrencyConflict.is_retryable());
    }
}
