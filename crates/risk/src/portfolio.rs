//! Portfolio-wide risk factors and the trading-halt decision.

use crate::gate::daily_loss_ratio;
use pulse_trade_core::types::{Position, TradingParams};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Volatility level treated as maximal risk (50% annualized).
const VOLATILITY_CEILING: f64 = 0.5;

/// Individual halt thresholds per factor.
const DAILY_LOSS_HALT: f64 = 0.8;
const CONCENTRATION_HALT: f64 = 0.7;
const VOLATILITY_HALT: f64 = 0.8;
const DRAWDOWN_HALT: f64 = 0.7;

/// Independent portfolio risk factors, each in \[0, 1\].
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioRisk {
    pub daily_loss_risk: f64,
    pub concentration_risk: f64,
    pub volatility_risk: f64,
    pub drawdown_risk: f64,
    pub overall: f64,
}

/// Assesses the open portfolio against the account balance and params.
#[must_use]
pub fn assess_portfolio(
    positions: &[Position],
    balance: Decimal,
    params: &TradingParams,
    daily_pnl: Decimal,
    market_volatility: f64,
) -> PortfolioRisk {
    let daily_loss_risk = daily_loss_ratio(daily_pnl, params.max_daily_loss).clamp(0.0, 1.0);

    // How much of the account is committed at once.
    let exposure: Decimal = positions.iter().map(|p| p.amount).sum();
    let concentration_risk = if balance > Decimal::ZERO {
        (exposure / balance).to_f64().unwrap_or(0.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let volatility_risk = (market_volatility / VOLATILITY_CEILING).clamp(0.0, 1.0);

    // Unrealized losses measured against the daily limit.
    let unrealized_loss: Decimal = positions
        .iter()
        .filter(|p| p.profit_loss < Decimal::ZERO)
        .map(|p| -p.profit_loss)
        .sum();
    let drawdown_risk = if params.max_daily_loss > Decimal::ZERO {
        (unrealized_loss / params.max_daily_loss)
            .to_f64()
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    let overall =
        (daily_loss_risk + concentration_risk + volatility_risk + drawdown_risk) / 4.0;

    PortfolioRisk {
        daily_loss_risk,
        concentration_risk,
        volatility_risk,
        drawdown_risk,
        overall,
    }
}

/// Whether automated trading should halt for the account.
///
/// Returns the halt reason, or `None` to continue. The daily-loss check
/// fires once 80% of the limit is consumed; independently, three elevated
/// factors together also force a halt.
#[must_use]
pub fn should_halt(
    portfolio: &PortfolioRisk,
    daily_pnl: Decimal,
    max_daily_loss: Decimal,
) -> Option<String> {
    if daily_pnl < Decimal::ZERO && daily_loss_ratio(daily_pnl, max_daily_loss) >= DAILY_LOSS_HALT {
        return Some("Daily loss limit exceeded".to_string());
    }

    let elevated = [
        portfolio.daily_loss_risk > DAILY_LOSS_HALT,
        portfolio.concentration_risk > CONCENTRATION_HALT,
        portfolio.volatility_risk > VOLATILITY_HALT,
        portfolio.drawdown_risk > DRAWDOWN_HALT,
    ]
    .iter()
    .filter(|flag| **flag)
    .count();

    if elevated >= 3 {
        return Some("Multiple risk factors elevated".to_string());
    }

    None
}
