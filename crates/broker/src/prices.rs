//! Rolling spot-price cache fed by inbound tick events.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

const HISTORY_CAP: usize = 120;

#[derive(Debug)]
struct PriceSeries {
    history: VecDeque<Decimal>,
    last_at: DateTime<Utc>,
}

/// Latest quotes and a bounded rolling window per symbol.
#[derive(Debug, Default)]
pub struct PriceCache {
    inner: RwLock<HashMap<String, PriceSeries>>,
}

impl PriceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, symbol: &str, quote: Decimal) {
        let mut inner = self.inner.write();
        let series = inner.entry(symbol.to_string()).or_insert_with(|| PriceSeries {
            history: VecDeque::with_capacity(HISTORY_CAP),
            last_at: Utc::now(),
        });
        if series.history.len() >= HISTORY_CAP {
            series.history.pop_front();
        }
        series.history.push_back(quote);
        series.last_at = Utc::now();
    }

    /// Most recent quote and its arrival time.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<(Decimal, DateTime<Utc>)> {
        let inner = self.inner.read();
        let series = inner.get(symbol)?;
        series.history.back().map(|q| (*q, series.last_at))
    }

    /// Up to `n` most recent quotes, oldest first.
    #[must_use]
    pub fn history(&self, symbol: &str, n: usize) -> Vec<Decimal> {
        let inner = self.inner.read();
        inner.get(symbol).map_or_else(Vec::new, |series| {
            let skip = series.history.len().saturating_sub(n);
            series.history.iter().skip(skip).copied().collect()
        })
    }
}
