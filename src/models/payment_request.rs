use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::user::SubscriptionTier;
use crate::services::pricing::Pricing;

/// An upgrade intent. Immutable once created except for the admin-only
/// transition out of `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: SubscriptionTier,
    pub period: i32,
    pub reference_code: String,
    pub original_amount: Decimal,
    pub amount: Decimal,
    pub discount_percentage: i32,
    pub period_discount: i32,
    pub first_time_discount: i32,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Cancelled,
}

impl PaymentRequest {
    pub fn new(user_id: Uuid, reference_code: String, pricing: &Pricing, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan: pricing.plan,
            period: pricing.period.into(),
            reference_code,
            original_amount: pricing.original_amount,
            amount: pricing.final_amount,
            discount_percentage: pricing.discount_percentage as i32,
            period_discount: pricing.period_discount as i32,
            first_time_discount: pricing.first_time_discount as i32,
            status: PaymentStatus::Pending,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        }
    }

    /// Terminal transitions are only allowed out of `pending`.
    pub fn check_resolvable(&self) -> AppResult<()> {
        match self.status {
            PaymentStatus::Pending => Ok(()),
            other => Err(AppError::Conflict(format!(
                "Payment request {} is already {:?}",
                self.reference_code, other
            ))),
        }
    }

    /// A first-time price is only honoured while the user still qualifies for it.
    pub fn check_first_time_eligible(&self, is_first_time_subscriber: bool) -> AppResult<()> {
        if self.first_time_discount > 0 && !is_first_time_subscriber {
            return Err(AppError::Conflict(format!(
                "Payment request {} carries a first-time discount that has already been used",
                self.reference_code
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::{compute_price, BillingPeriod};

    #[test]
    fn new_request_copies_pricing() {
        let pricing = compute_price(SubscriptionTier::StarterTrader, BillingPeriod::Quarterly, true).unwrap();
        let req = PaymentRequest::new(Uuid::new_v4(), "PAY-ABC123".into(), &pricing, Utc::now());
        assert_eq!(req.plan, SubscriptionTier::StarterTrader);
        assert_eq!(req.period, 3);
        assert_eq!(req.amount, Decimal::new(10530, 2));
        assert_eq!(req.discount_percentage, 30);
        assert_eq!(req.status, PaymentStatus::Pending);
        assert!(req.check_resolvable().is_ok());
    }

    #[test]
    fn resolved_requests_cannot_transition_again() {
        let pricing = compute_price(SubscriptionTier::ProTrader, BillingPeriod::Monthly, false).unwrap();
        let mut req = PaymentRequest::new(Uuid::new_v4(), "PAY-ABC123".into(), &pricing, Utc::now());
        req.status = PaymentStatus::Completed;
        assert!(matches!(req.check_resolvable(), Err(AppError::Conflict(_))));
        req.status = PaymentStatus::Cancelled;
        assert!(matches!(req.check_resolvable(), Err(AppError::Conflict(_))));
    }

    #[test]
    fn first_time_price_only_confirmed_once() {
        let pricing = compute_price(SubscriptionTier::ProTrader, BillingPeriod::Yearly, true).unwrap();
        let first = PaymentRequest::new(Uuid::new_v4(), "PAY-AAA111".into(), &pricing, Utc::now());
        let second = PaymentRequest::new(first.user_id, "PAY-BBB222".into(), &pricing, Utc::now());
        assert_eq!(second.first_time_discount, 10);

        assert!(first.check_first_time_eligible(true).is_ok());
        // Confirming the first request clears the flag for the user.
        assert!(matches!(
            second.check_first_time_eligible(false),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn full_price_requests_ignore_first_time_flag() {
        let pricing = compute_price(SubscriptionTier::StarterTrader, BillingPeriod::Monthly, false).unwrap();
        let req = PaymentRequest::new(Uuid::new_v4(), "PAY-CCC333".into(), &pricing, Utc::now());
        assert_eq!(req.first_time_discount, 0);
        assert!(req.check_first_time_eligible(false).is_ok());
        assert!(req.check_first_time_eligible(true).is_ok());
    }
}
