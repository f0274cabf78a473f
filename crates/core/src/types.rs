//! Domain model shared across the pipeline crates.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Contract direction for a short-duration derivative trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    /// Profits when the spot rises above the entry.
    Call,
    /// Profits when the spot falls below the entry.
    Put,
}

/// An unexecuted, advisory trade recommendation for one user/symbol pair.
///
/// Produced by the scanner, consumed exactly once by the execution pipeline
/// or discarded when stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub user_id: String,
    pub symbol: String,
    pub direction: TradeDirection,
    pub amount: Decimal,
    pub duration_secs: u64,
    /// Advisor confidence in \[0, 1\].
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
}

impl CandidateSignal {
    /// Age of the signal relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.generated_at
    }

    /// True once the signal has outlived `max_age_secs`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_secs: u64) -> bool {
        self.age(now) > Duration::seconds(i64::try_from(max_age_secs).unwrap_or(i64::MAX))
    }
}

/// Lifecycle of a position record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    /// Submitted to the broker, confirmation not yet received.
    Pending,
    /// Confirmed by the broker, under supervision.
    Open,
    /// Terminated; `exit_time` and `close_reason` are set.
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfitReached,
    StopLossTriggered,
    DurationExpired,
    DailyLossLimitExceeded,
    EmergencyStop,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TakeProfitReached => "take_profit_reached",
            Self::StopLossTriggered => "stop_loss_triggered",
            Self::DurationExpired => "duration_expired",
            Self::DailyLossLimitExceeded => "daily_loss_limit_exceeded",
            Self::EmergencyStop => "emergency_stop",
        };
        f.write_str(s)
    }
}

/// One executed trade and its supervision state.
///
/// Created by the execution pipeline on successful submission, mutated only
/// by the supervision step, terminated by take-profit, stop-loss, duration
/// expiry, or emergency stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub direction: TradeDirection,
    pub amount: Decimal,
    pub entry_spot: Decimal,
    pub current_spot: Decimal,
    pub profit_loss: Decimal,
    pub status: PositionStatus,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub broker_contract_id: Option<String>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    /// Profit/loss of a contract: stake times the fractional move from the
    /// entry spot, sign-flipped for PUT.
    #[must_use]
    pub fn pnl_at(direction: TradeDirection, entry: Decimal, current: Decimal, amount: Decimal) -> Decimal {
        if entry.is_zero() {
            return Decimal::ZERO;
        }
        let change = (current - entry) / entry;
        match direction {
            TradeDirection::Call => amount * change,
            TradeDirection::Put => -(amount * change),
        }
    }

    /// Refreshes the current spot and recomputes profit/loss.
    pub fn refresh_spot(&mut self, current: Decimal) {
        self.current_spot = current;
        self.profit_loss = Self::pnl_at(self.direction, self.entry_spot, current, self.amount);
    }

    /// True once the contract duration has elapsed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.entry_time >= Duration::seconds(i64::try_from(self.duration_secs).unwrap_or(i64::MAX))
    }

    /// Marks the position closed at the given spot and time.
    pub fn close(&mut self, exit_spot: Decimal, now: DateTime<Utc>, reason: CloseReason) {
        self.refresh_spot(exit_spot);
        self.status = PositionStatus::Closed;
        self.exit_time = Some(now);
        self.close_reason = Some(reason);
    }
}

/// Severity of an assessed risk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What the risk gate wants done with a candidate or open position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Allow,
    Reduce,
    Halt,
    Close,
    EmergencyStop,
}

/// Outcome of a risk assessment. Recomputed at candidate time and at every
/// supervision tick; never persisted beyond the decision it informs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub level: RiskLevel,
    /// Composite score in \[0, 1\].
    pub score: f64,
    pub action: RiskAction,
    /// Multiplier applied to the recommended amount, in \[0, 2\].
    pub size_multiplier: f64,
    pub reasons: Vec<String>,
}

impl RiskVerdict {
    /// True when the action permits execution (possibly at reduced size).
    #[must_use]
    pub fn permits_execution(&self) -> bool {
        matches!(self.action, RiskAction::Allow | RiskAction::Reduce)
    }
}

/// Self-reported trading experience, used as a scoring modifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Novice,
    #[default]
    Intermediate,
    Experienced,
}

/// Configured appetite for risk, used as a scoring modifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

/// Per-user trading parameters, loaded from the trader directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingParams {
    /// Take-profit threshold as a fraction of the stake.
    pub take_profit_pct: Decimal,
    /// Stop-loss threshold as a fraction of the stake.
    pub stop_loss_pct: Decimal,
    /// Daily loss limit used by risk scoring and halt checks.
    pub max_daily_loss: Decimal,
    /// Recommended stake per trade.
    pub position_size: Decimal,
    /// Absolute cap on the amount a single submission may risk.
    pub max_daily_loss_amount: Decimal,
    pub max_concurrent_positions: usize,
    /// Contract duration applied to dispatched signals.
    pub trade_duration_secs: u64,
    pub experience: ExperienceLevel,
    pub risk_tolerance: RiskTolerance,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            take_profit_pct: Decimal::new(10, 2),     // 0.10
            stop_loss_pct: Decimal::new(10, 2),       // 0.10
            max_daily_loss: Decimal::from(100),
            position_size: Decimal::from(10),
            max_daily_loss_amount: Decimal::from(100),
            max_concurrent_positions: 3,
            trade_duration_secs: 300,
            experience: ExperienceLevel::default(),
            risk_tolerance: RiskTolerance::default(),
        }
    }
}

/// Account-level inputs to a risk assessment.
#[derive(Debug, Clone)]
pub struct AccountState {
    pub balance: Decimal,
    pub open_position_count: usize,
    /// Realized profit/loss for the current day (negative for losses).
    pub daily_pnl: Decimal,
    /// The user's configured daily loss limit.
    pub max_daily_loss: Decimal,
    pub experience: ExperienceLevel,
    pub risk_tolerance: RiskTolerance,
}

/// Market snapshot for one symbol: current price plus a rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current: Decimal,
    /// Most recent prices, oldest first.
    pub history: Vec<Decimal>,
    /// Annualized realized volatility as a fraction (0.40 = 40%).
    pub volatility: f64,
    pub fetched_at: DateTime<Utc>,
}
