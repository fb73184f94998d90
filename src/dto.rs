//! Request/response contract types.
//!
//! - `*Request` / `*Query` are deserialized from the client
//! - `*Response` are serialized back
//! - Field validation uses `validator` derives, checked by [`validated`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::payment_request::{PaymentRequest, PaymentStatus};
use crate::models::signal::{SignalOutcome, SignalStatus, Timeframe, TradingSignal};
use crate::models::user::{Subscription, SubscriptionTier};
use crate::services::challenge::ChallengeProgress;
use crate::services::pricing::{BillingPeriod, Pricing};
use crate::services::subscription::{self, SubscriptionState};

pub fn validated<T: Validate>(body: T) -> AppResult<T> {
    body.validate()
        .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
    Ok(body)
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Auth
// ============================================================================

/// POST /api/auth/register
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 254, message = "Email too long"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

/// POST /api/auth/login
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

/// POST /api/auth/refresh
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// ============================================================================
// Signals
// ============================================================================

/// POST /api/signal-generation
#[derive(Debug, Deserialize)]
pub struct GenerateSignalRequest {
    pub timeframe: Timeframe,
}

/// GET /api/signals
#[derive(Debug, Deserialize, Validate)]
pub struct SignalListQuery {
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<i64>,
}

/// PUT /api/signals/:id/outcome
#[derive(Debug, Deserialize)]
pub struct ReportOutcomeRequest {
    pub outcome: SignalOutcome,
}

#[derive(Debug, Serialize)]
pub struct ReportOutcomeResponse {
    pub signal: TradingSignal,
    pub challenge: ChallengeProgress,
}

/// PUT /api/admin/signals/:id/status
#[derive(Debug, Deserialize)]
pub struct UpdateSignalStatusRequest {
    pub status: SignalStatus,
}

// ============================================================================
// Subscription & payments
// ============================================================================

/// POST /api/payment-requests and GET /api/pricing
#[derive(Debug, Deserialize)]
pub struct PlanSelection {
    pub plan: SubscriptionTier,
    pub period: BillingPeriod,
}

#[derive(Debug, Serialize)]
pub struct PaymentRequestResponse {
    pub payment_request: PaymentRequest,
    pub pricing: Pricing,
    pub confirmation_message: String,
    /// Absent when no payment contact is configured.
    pub confirmation_link: Option<String>,
}

/// GET /api/admin/payment-requests
#[derive(Debug, Deserialize)]
pub struct PaymentRequestQuery {
    pub status: Option<PaymentStatus>,
    /// Exact `PAY-XXXXXX` lookup, as quoted by the user.
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription_tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub state: SubscriptionState,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub grace_period_end_date: Option<DateTime<Utc>>,
    pub subscription_period: Option<i32>,
    pub is_first_time_subscriber: bool,
    pub days_remaining: Option<i64>,
}

impl SubscriptionResponse {
    pub fn build(sub: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            subscription_tier: sub.subscription_tier,
            effective_tier: subscription::effective_tier(sub, now),
            state: subscription::state_at(sub, now),
            subscription_start_date: sub.subscription_start_date,
            subscription_end_date: sub.subscription_end_date,
            grace_period_end_date: subscription::grace_period_end(sub),
            subscription_period: sub.subscription_period,
            is_first_time_subscriber: sub.is_first_time_subscriber,
            days_remaining: subscription::days_remaining(sub, now),
        }
    }
}

/// POST /api/admin/payment-requests/:id/confirm
#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    pub payment_request: PaymentRequest,
    pub user_id: Uuid,
    pub subscription: SubscriptionResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_validation() {
        let bad = RegisterRequest {
            email: "not-an-email".into(),
            password: "short".into(),
            name: String::new(),
        };
        assert!(matches!(validated(bad), Err(AppError::InvalidArgument(_))));

        let good = RegisterRequest {
            email: "trader@example.com".into(),
            password: "longenough".into(),
            name: "Trader".into(),
        };
        assert!(validated(good).is_ok());
    }

    #[test]
    fn test_plan_selection_rejects_unknown_period() {
        let ok: PlanSelection = serde_json::from_str(r#"{"plan":"pro_trader","period":12}"#).unwrap();
        assert_eq!(ok.plan, SubscriptionTier::ProTrader);
        assert_eq!(ok.period, BillingPeriod::Yearly);
        assert!(serde_json::from_str::<PlanSelection>(r#"{"plan":"pro_trader","period":6}"#).is_err());
    }

    #[test]
    fn test_generate_request_parses_timeframe() {
        let req: GenerateSignalRequest = serde_json::from_str(r#"{"timeframe":"15m"}"#).unwrap();
        assert_eq!(req.timeframe, Timeframe::M15);
        assert!(serde_json::from_str::<GenerateSignalRequest>(r#"{"timeframe":"7m"}"#).is_err());
    }

    #[test]
    fn test_subscription_response_for_free_user() {
        let resp = SubscriptionResponse::build(&Subscription::default(), Utc::now());
        assert_eq!(resp.state, SubscriptionState::Free);
        assert_eq!(resp.effective_tier, SubscriptionTier::Free);
        assert_eq!(resp.grace_period_end_date, None);
    }
}
