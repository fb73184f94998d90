//! Subscription pricing.
//!
//! | plan           | 1 mo | 3 mo        | 12 mo       |
//! |----------------|------|-------------|-------------|
//! | starter_trader | $49  | $117 (20%)  | $319 (45%)  |
//! | pro_trader     | $99  | $237 (20%)  | $700 (45%)  |
//!
//! First-time subscribers get a further 10% of the period price off. The
//! reported `discount_percentage` is the sum of both labels, not a compounded rate.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::user::SubscriptionTier;

pub const FIRST_TIME_DISCOUNT_PERCENT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingPeriod {
    pub fn months(self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Quarterly => 3,
            BillingPeriod::Yearly => 12,
        }
    }
}

impl TryFrom<i32> for BillingPeriod {
    type Error = AppError;

    fn try_from(months: i32) -> Result<Self, Self::Error> {
        match months {
            1 => Ok(BillingPeriod::Monthly),
            3 => Ok(BillingPeriod::Quarterly),
            12 => Ok(BillingPeriod::Yearly),
            other => Err(AppError::InvalidArgument(format!(
                "Period must be 1, 3 or 12 months, got {}",
                other
            ))),
        }
    }
}

impl From<BillingPeriod> for i32 {
    fn from(period: BillingPeriod) -> Self {
        period.months() as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub plan: SubscriptionTier,
    pub period: BillingPeriod,
    /// Monthly list price times the number of months.
    pub original_amount: Decimal,
    /// Period price from the table, before the first-time discount.
    pub base_amount: Decimal,
    pub final_amount: Decimal,
    pub discount_percentage: u32,
    pub period_discount: u32,
    pub first_time_discount: u32,
    pub first_time_discount_amount: Decimal,
}

impl Pricing {
    pub fn savings(&self) -> Decimal {
        self.original_amount - self.final_amount
    }
}

/// `(monthly list price, period price, period discount %)`
fn price_row(plan: SubscriptionTier, period: BillingPeriod) -> AppResult<(i64, i64, u32)> {
    let row = match (plan, period) {
        (SubscriptionTier::StarterTrader, BillingPeriod::Monthly) => (49, 49, 0),
        (SubscriptionTier::StarterTrader, BillingPeriod::Quarterly) => (49, 117, 20),
        (SubscriptionTier::StarterTrader, BillingPeriod::Yearly) => (49, 319, 45),
        (SubscriptionTier::ProTrader, BillingPeriod::Monthly) => (99, 99, 0),
        (SubscriptionTier::ProTrader, BillingPeriod::Quarterly) => (99, 237, 20),
        (SubscriptionTier::ProTrader, BillingPeriod::Yearly) => (99, 700, 45),
        (other, _) => {
            return Err(AppError::InvalidArgument(format!(
                "Plan '{}' cannot be purchased",
                other
            )))
        }
    };
    Ok(row)
}

/// Round half away from zero to cents, always carrying two decimal places.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

pub fn compute_price(
    plan: SubscriptionTier,
    period: BillingPeriod,
    is_first_time: bool,
) -> AppResult<Pricing> {
    let (monthly, base, period_discount) = price_row(plan, period)?;
    let original_amount = Decimal::from(monthly * period.months() as i64);
    let base_amount = Decimal::from(base);

    let first_time_discount = if is_first_time { FIRST_TIME_DISCOUNT_PERCENT } else { 0 };
    let first_time_discount_amount =
        round_money(base_amount * Decimal::from(first_time_discount) / Decimal::from(100));

    Ok(Pricing {
        plan,
        period,
        original_amount: round_money(original_amount),
        base_amount: round_money(base_amount),
        final_amount: round_money(base_amount - first_time_discount_amount),
        discount_percentage: period_discount + first_time_discount,
        period_discount,
        first_time_discount,
        first_time_discount_amount,
    })
}
