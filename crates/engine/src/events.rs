//! Observability events published by the engine.

use chrono::{DateTime, Utc};
use pulse_trade_core::types::{CloseReason, RiskAction};
use rust_decimal::Decimal;

/// Audit/event stream emitted on a broadcast channel; dropped when nobody
/// listens.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SignalReceived {
        user_id: String,
        symbol: String,
        timestamp: DateTime<Utc>,
    },
    TradeExecuted {
        user_id: String,
        symbol: String,
        position_id: String,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        user_id: String,
        position_id: String,
        reason: CloseReason,
        profit_loss: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// A candidate was vetoed by the risk gate; by design, not an error.
    RiskRejected {
        user_id: String,
        symbol: String,
        action: RiskAction,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    EmergencyStopTriggered {
        user_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Supervision kept failing; the position needs a human look.
    ManualReviewRequired {
        position_id: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
}
