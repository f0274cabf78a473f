//! Pre-trade risk assessment for candidate signals.
//!
//! Scoring is additive over independent factors and clamped to \[0, 1\];
//! the score maps onto a level and an action. One rule is non-bypassable:
//! once the day's realized loss reaches the configured limit, every
//! candidate is vetoed with an emergency stop regardless of its score.

use pulse_trade_core::types::{
    AccountState, CandidateSignal, ExperienceLevel, RiskAction, RiskLevel, RiskTolerance,
    RiskVerdict,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

const BASE_SCORE: f64 = 0.3;

/// Multiplier applied to the recommended amount on a `Reduce` verdict.
const REDUCE_MULTIPLIER: f64 = 0.7;

/// Market-wide inputs to a risk assessment.
#[derive(Debug, Clone, Copy)]
pub struct MarketState {
    /// Annualized realized volatility as a fraction (0.40 = 40%).
    pub volatility: f64,
}

/// Scores candidates and open portfolios against account and market state.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskGate;

impl RiskGate {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Assesses a candidate signal against account and market state.
    #[must_use]
    pub fn assess_candidate(
        &self,
        candidate: &CandidateSignal,
        account: &AccountState,
        market: &MarketState,
    ) -> RiskVerdict {
        let mut score = BASE_SCORE;
        let mut reasons = Vec::new();

        // Position size relative to balance.
        let size_pct = ratio(candidate.amount, account.balance);
        if size_pct > 0.10 {
            score += 0.2;
            reasons.push(format!("position is {:.1}% of balance", size_pct * 100.0));
        } else if size_pct >= 0.05 {
            score += 0.1;
            reasons.push(format!("position is {:.1}% of balance", size_pct * 100.0));
        }

        // Market volatility.
        if market.volatility > 0.40 {
            score += 0.2;
            reasons.push(format!("volatility {:.0}%", market.volatility * 100.0));
        } else if market.volatility >= 0.30 {
            score += 0.1;
            reasons.push(format!("elevated volatility {:.0}%", market.volatility * 100.0));
        }

        // Portfolio crowding.
        if account.open_position_count > 5 {
            let excess = account.open_position_count - 5;
            score += 0.1 * excess as f64;
            reasons.push(format!("{} open positions", account.open_position_count));
        }

        // Proximity to the daily loss limit.
        let loss_ratio = daily_loss_ratio(account.daily_pnl, account.max_daily_loss);
        if loss_ratio >= 0.8 {
            score += 0.3;
            reasons.push(format!("daily loss at {:.0}% of limit", loss_ratio * 100.0));
        } else if loss_ratio >= 0.5 {
            score += 0.1;
            reasons.push(format!("daily loss at {:.0}% of limit", loss_ratio * 100.0));
        }

        // Trader profile modifiers.
        match account.experience {
            ExperienceLevel::Novice => score += 0.1,
            ExperienceLevel::Intermediate => {}
            ExperienceLevel::Experienced => score -= 0.05,
        }
        match account.risk_tolerance {
            RiskTolerance::Conservative => score += 0.05,
            RiskTolerance::Moderate => {}
            RiskTolerance::Aggressive => score -= 0.05,
        }

        score = score.clamp(0.0, 1.0);

        // Hard daily-loss breaker, not bypassable by any score.
        if account.max_daily_loss > Decimal::ZERO && account.daily_pnl <= -account.max_daily_loss {
            reasons.push("daily loss limit breached".to_string());
            return RiskVerdict {
                level: RiskLevel::Critical,
                score: 1.0,
                action: RiskAction::EmergencyStop,
                size_multiplier: 0.0,
                reasons,
            };
        }

        let (level, action, size_multiplier) = map_score(score);
        let verdict = RiskVerdict {
            level,
            score,
            action,
            size_multiplier,
            reasons,
        };
        tracing::debug!(
            user = %candidate.user_id,
            symbol = %candidate.symbol,
            score = verdict.score,
            action = ?verdict.action,
            "candidate risk assessed"
        );
        verdict
    }
}

fn map_score(score: f64) -> (RiskLevel, RiskAction, f64) {
    if score > 0.8 {
        (RiskLevel::Critical, RiskAction::EmergencyStop, 0.0)
    } else if score > 0.6 {
        (RiskLevel::High, RiskAction::Halt, 0.0)
    } else if score > 0.4 {
        (RiskLevel::Medium, RiskAction::Reduce, REDUCE_MULTIPLIER)
    } else {
        (RiskLevel::Low, RiskAction::Allow, 1.0)
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator <= Decimal::ZERO {
        return 0.0;
    }
    (numerator / denominator).to_f64().unwrap_or(0.0)
}

/// Fraction of the daily loss limit consumed so far (0 when profitable).
pub(crate) fn daily_loss_ratio(daily_pnl: Decimal, max_daily_loss: Decimal) -> f64 {
    if daily_pnl >= Decimal::ZERO {
        return 0.0;
    }
    ratio(-daily_pnl, max_daily_loss)
}
