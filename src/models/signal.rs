use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradingSignal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub direction: SignalDirection,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Ordered by risk-reward ascending.
    pub take_profits: Json<Vec<TakeProfit>>,
    pub rationale: Option<String>,
    pub status: SignalStatus,
    pub user_action: SignalOutcome,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub outcome_reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "signal_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "signal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Fresh,
    Active,
    Closed,
    Stopped,
}

impl SignalStatus {
    /// fresh -> active -> closed | stopped
    pub fn can_transition_to(self, next: SignalStatus) -> bool {
        matches!(
            (self, next),
            (SignalStatus::Fresh, SignalStatus::Active)
                | (SignalStatus::Active, SignalStatus::Closed)
                | (SignalStatus::Active, SignalStatus::Stopped)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, SignalStatus::Closed | SignalStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "signal_outcome", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Pending,
    Successful,
    Unsuccessful,
    DidntTake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| AppError::InvalidArgument(format!("Unsupported timeframe '{}'", s)))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(t: Timeframe) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    pub risk_reward: f64,
}

/// What the signal model returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    pub direction: SignalDirection,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profits: Vec<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl TradingSignal {
    /// Validates model output and orders take-profit levels by risk-reward.
    pub fn from_payload(
        user_id: Uuid,
        timeframe: Timeframe,
        payload: SignalPayload,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let SignalPayload {
            symbol,
            direction,
            entry_price,
            stop_loss,
            take_profits,
            rationale,
        } = payload;

        let inconsistent =
            |reason: &str| AppError::ExternalGenerationFailure(format!("model returned {}", reason));

        let all_prices = std::iter::once(entry_price)
            .chain(std::iter::once(stop_loss))
            .chain(take_profits.iter().copied());
        if all_prices.into_iter().any(|p| !p.is_finite() || p <= 0.0) {
            return Err(inconsistent("non-positive prices"));
        }
        if symbol.trim().is_empty() {
            return Err(inconsistent("no symbol"));
        }
        if take_profits.is_empty() {
            return Err(inconsistent("no take-profit levels"));
        }

        let risk = match direction {
            SignalDirection::Long => entry_price - stop_loss,
            SignalDirection::Short => stop_loss - entry_price,
        };
        if risk <= 0.0 {
            return Err(inconsistent("a stop loss on the wrong side of entry"));
        }

        let mut levels = Vec::with_capacity(take_profits.len());
        for price in take_profits {
            let reward = match direction {
                SignalDirection::Long => price - entry_price,
                SignalDirection::Short => entry_price - price,
            };
            if reward <= 0.0 {
                return Err(inconsistent("a take-profit on the wrong side of entry"));
            }
            levels.push(TakeProfit {
                price,
                risk_reward: (reward / risk * 100.0).round() / 100.0,
            });
        }
        levels.sort_by(|a, b| a.risk_reward.total_cmp(&b.risk_reward));

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.trim().to_uppercase(),
            timeframe: timeframe.as_str().to_string(),
            direction,
            entry_price,
            stop_loss,
            take_profits: Json(levels),
            rationale,
            status: SignalStatus::Fresh,
            user_action: SignalOutcome::Pending,
            created_at: now,
            status_changed_at: None,
            outcome_reported_at: None,
        })
    }

    /// The user reports an outcome once, after the signal has finished.
    pub fn check_outcome_report(&self, outcome: SignalOutcome) -> AppResult<()> {
        if outcome == SignalOutcome::Pending {
            return Err(AppError::InvalidArgument("Outcome cannot be 'pending'".into()));
        }
        if !self.status.is_finished() {
            return Err(AppError::Conflict(
                "Outcome can only be reported once the signal is closed or stopped".into(),
            ));
        }
        if self.user_action != SignalOutcome::Pending {
            return Err(AppError::Conflict("Outcome already reported".into()));
        }
        Ok(())
    }
}
