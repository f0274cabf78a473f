//! Signal advisor seam.
//!
//! The advisor is an external collaborator producing a typed
//! recommendation plus a confidence score. When it is unavailable the
//! scanner falls back to deterministic indicator-based scoring at reduced
//! confidence rather than failing the tick.

use crate::indicators::{momentum, rsi};
use anyhow::{Context, Result};
use async_trait::async_trait;
use pulse_trade_core::types::{MarketSnapshot, RiskLevel, TradeDirection};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Confidence multiplier applied to indicator-derived opportunities.
const FALLBACK_CONFIDENCE_DISCOUNT: f64 = 0.8;

/// A scored trading opportunity for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub direction: TradeDirection,
    /// Confidence in \[0, 1\].
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub reasoning: String,
}

/// Scores market snapshots into opportunities.
#[async_trait]
pub trait SignalAdvisor: Send + Sync {
    async fn score(&self, snapshot: &MarketSnapshot) -> Result<Opportunity>;
}

// =============================================================================
// HTTP advisor
// =============================================================================

/// Remote advisor reached over HTTP.
pub struct HttpAdvisor {
    client: reqwest::Client,
    url: String,
}

impl HttpAdvisor {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build advisor HTTP client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl SignalAdvisor for HttpAdvisor {
    async fn score(&self, snapshot: &MarketSnapshot) -> Result<Opportunity> {
        let response = self
            .client
            .post(&self.url)
            .json(snapshot)
            .send()
            .await
            .with_context(|| format!("advisor request to {} failed", self.url))?
            .error_for_status()
            .context("advisor returned error status")?;

        let opportunity = response
            .json::<Opportunity>()
            .await
            .context("advisor returned malformed opportunity")?;
        Ok(opportunity)
    }
}

// =============================================================================
// Indicator fallback
// =============================================================================

/// Deterministic indicator-based scoring, used when the advisor is down or
/// not configured. Confidence is discounted relative to advisor output.
#[must_use]
pub fn indicator_opportunity(snapshot: &MarketSnapshot) -> Option<Opportunity> {
    let rsi_value = rsi(&snapshot.history, 14)?;
    let trend = momentum(&snapshot.history);

    // Mean-reversion at RSI extremes, confirmed against the recent trend.
    let (direction, strength, setup) = if rsi_value <= 30.0 {
        (TradeDirection::Call, (30.0 - rsi_value) / 30.0, "oversold")
    } else if rsi_value >= 70.0 {
        (TradeDirection::Put, (rsi_value - 70.0) / 30.0, "overbought")
    } else {
        return None;
    };

    let confirms = match direction {
        TradeDirection::Call => trend <= 0.0,
        TradeDirection::Put => trend >= 0.0,
    };

    let mut confidence = 0.6 + 0.35 * strength.clamp(0.0, 1.0);
    if confirms {
        confidence += 0.05;
    }
    confidence = (confidence * FALLBACK_CONFIDENCE_DISCOUNT).clamp(0.0, 1.0);

    let risk_level = if snapshot.volatility > 0.40 {
        RiskLevel::High
    } else if snapshot.volatility >= 0.30 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    Some(Opportunity {
        direction,
        confidence,
        risk_level,
        reasoning: format!(
            "indicator fallback: {setup} (RSI {rsi_value:.1}), momentum {:.2}%",
            trend * 100.0
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn snapshot(values: &[f64], volatility: f64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "R_100".to_string(),
            current: Decimal::try_from(*values.last().unwrap()).unwrap(),
            history: values
                .iter()
                .map(|v| Decimal::try_from(*v).unwrap())
                .collect(),
            volatility,
            fetched_at: Utc::now(),
        }
    }

    fn falling_series() -> Vec<f64> {
        (0..20).map(|i| 1.0 - 0.005 * f64::from(i)).collect()
    }

    fn rising_series() -> Vec<f64> {
        (0..20).map(|i| 1.0 + 0.005 * f64::from(i)).collect()
    }

    #[test]
    fn oversold_series_yields_call() {
        let opp = indicator_opportunity(&snapshot(&falling_series(), 0.1)).unwrap();

        assert_eq!(opp.direction, TradeDirection::Call);
        assert_eq!(opp.risk_level, RiskLevel::Low);
        // Hard oversold with confirming momentum clears the dispatch bar
        // even after the fallback discount.
        assert!(opp.confidence >= 0.7);
    }

    #[test]
    fn overbought_series_yields_put() {
        let opp = indicator_opportunity(&snapshot(&rising_series(), 0.1)).unwrap();
        assert_eq!(opp.direction, TradeDirection::Put);
    }

    #[test]
    fn neutral_series_yields_nothing() {
        let choppy: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 1.0 } else { 1.01 })
            .collect();
        assert!(indicator_opportunity(&snapshot(&choppy, 0.1)).is_none());
    }

    #[test]
    fn risk_level_tracks_volatility() {
        let series = falling_series();
        assert_eq!(
            indicator_opportunity(&snapshot(&series, 0.45)).unwrap().risk_level,
            RiskLevel::High
        );
        assert_eq!(
            indicator_opportunity(&snapshot(&series, 0.35)).unwrap().risk_level,
            RiskLevel::Medium
        );
    }

    #[test]
    fn short_history_yields_nothing() {
        assert!(indicator_opportunity(&snapshot(&[1.0, 0.9, 0.8], 0.1)).is_none());
    }
}
