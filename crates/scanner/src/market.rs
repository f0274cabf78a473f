//! Market data adapter over the broker connection manager.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use pulse_trade_broker::manager::ConnectionManager;
use pulse_trade_broker::transport::TransportFactory;
use pulse_trade_core::store::MarketDataSource;
use pulse_trade_core::types::MarketSnapshot;
use std::sync::Arc;

use crate::indicators::realized_volatility;

/// Serves snapshots from the broker tick feed: a fresh quote per request
/// plus the cached rolling window.
pub struct BrokerMarketData<F: TransportFactory> {
    manager: Arc<ConnectionManager<F>>,
    history_len: usize,
}

impl<F: TransportFactory> BrokerMarketData<F> {
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager<F>>, history_len: usize) -> Self {
        Self { manager, history_len }
    }
}

#[async_trait]
impl<F: TransportFactory> MarketDataSource for BrokerMarketData<F> {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let current = self.manager.market_tick(symbol).await?;
        let history = self.manager.price_history(symbol, self.history_len);
        let volatility = realized_volatility(&history);
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current,
            history,
            volatility,
            fetched_at: Utc::now(),
        })
    }
}
