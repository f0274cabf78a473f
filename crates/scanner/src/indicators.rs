//! Stateless technical-indicator utilities.
//!
//! These feed the deterministic fallback scoring path and the volatility
//! estimate attached to market snapshots. Nothing here holds state.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Bars per year used to annualize per-bar return volatility.
const ANNUALIZATION_PERIODS: f64 = 252.0;

/// Simple moving average over the trailing `period` prices.
#[must_use]
pub fn sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Relative strength index over the trailing `period` price changes.
#[must_use]
pub fn rsi(prices: &[Decimal], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let change = (pair[1] - pair[0]).to_f64().unwrap_or(0.0);
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = gains / losses;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Fractional change from the first to the last price.
#[must_use]
pub fn momentum(prices: &[Decimal]) -> f64 {
    match (prices.first(), prices.last()) {
        (Some(first), Some(last)) if !first.is_zero() => {
            ((*last - *first) / *first).to_f64().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

/// Annualized realized volatility of per-bar simple returns.
#[must_use]
pub fn realized_volatility(prices: &[Decimal]) -> f64 {
    if prices.len() < 3 {
        return 0.0;
    }
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| !w[0].is_zero())
        .map(|w| ((w[1] - w[0]) / w[0]).to_f64().unwrap_or(0.0))
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt() * ANNUALIZATION_PERIODS.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prices(values: &[f64]) -> Vec<Decimal> {
        values
            .iter()
            .map(|v| Decimal::try_from(*v).unwrap())
            .collect()
    }

    #[test]
    fn sma_averages_trailing_window() {
        let p = prices(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sma(&p, 2), Some(dec!(3.5)));
        assert_eq!(sma(&p, 4), Some(dec!(2.5)));
        assert_eq!(sma(&p, 5), None);
        assert_eq!(sma(&p, 0), None);
    }

    #[test]
    fn rsi_extremes() {
        // Monotonic rise: no losses.
        let rising = prices(&[1.0, 1.1, 1.2, 1.3, 1.4]);
        assert_eq!(rsi(&rising, 4), Some(100.0));

        // Monotonic fall: RSI near zero.
        let falling = prices(&[1.4, 1.3, 1.2, 1.1, 1.0]);
        let value = rsi(&falling, 4).unwrap();
        assert!(value < 1.0);

        assert_eq!(rsi(&rising, 10), None);
    }

    #[test]
    fn rsi_balanced_moves_near_fifty() {
        let choppy = prices(&[1.0, 1.1, 1.0, 1.1, 1.0, 1.1]);
        let value = rsi(&choppy, 5).unwrap();
        assert!((value - 50.0).abs() < 15.0);
    }

    #[test]
    fn momentum_sign_follows_trend() {
        assert!(momentum(&prices(&[1.0, 1.2])) > 0.0);
        assert!(momentum(&prices(&[1.2, 1.0])) < 0.0);
        assert_eq!(momentum(&[]), 0.0);
    }

    #[test]
    fn flat_series_has_zero_volatility() {
        let flat = prices(&[1.0, 1.0, 1.0, 1.0]);
        assert!(realized_volatility(&flat) < f64::EPSILON);
    }

    #[test]
    fn choppier_series_has_higher_volatility() {
        let calm = prices(&[1.0, 1.001, 1.002, 1.001, 1.0]);
        let wild = prices(&[1.0, 1.05, 0.97, 1.06, 0.95]);
        assert!(realized_volatility(&wild) > realized_volatility(&calm));
    }
}
