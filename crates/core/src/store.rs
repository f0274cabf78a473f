//! Service seams for external collaborators.
//!
//! Persistence and market data are consumed through traits; durable
//! backends live outside this workspace. The in-memory implementations
//! back tests and paper runs.

use crate::types::{MarketSnapshot, Position, PositionStatus, TradingParams};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable position records. Assumed strongly consistent per document.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Inserts or replaces a position by id.
    async fn save_position(&self, position: &Position) -> Result<()>;

    async fn position(&self, id: &str) -> Result<Option<Position>>;

    async fn open_positions(&self, user_id: &str) -> Result<Vec<Position>>;

    /// Realized profit/loss over positions closed today (UTC).
    async fn daily_realized_pnl(&self, user_id: &str) -> Result<Decimal>;

    /// Backend reachability, reported on the status surface.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Per-user trading configuration, credentials, and the auto-trading roster.
#[async_trait]
pub trait TraderDirectory: Send + Sync {
    async fn trading_params(&self, user_id: &str) -> Result<Option<TradingParams>>;

    /// Brokerage API token for the user, if one is stored.
    async fn credential(&self, user_id: &str) -> Result<Option<String>>;

    /// Users currently enabled for automated trading.
    async fn auto_trading_users(&self) -> Result<Vec<String>>;

    async fn set_auto_trading(&self, user_id: &str, enabled: bool) -> Result<()>;

    /// Whether automated trading is currently enabled for the user.
    async fn auto_trading_enabled(&self, user_id: &str) -> Result<bool> {
        Ok(self
            .auto_trading_users()
            .await?
            .iter()
            .any(|id| id == user_id))
    }
}

/// Price snapshots for the scanner, one symbol at a time.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Position store backed by a process-local map.
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<String, Position>>,
}

impl InMemoryPositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn save_position(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn position(&self, id: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(id).cloned())
    }

    async fn open_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id && p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn daily_realized_pnl(&self, user_id: &str) -> Result<Decimal> {
        let today = Utc::now().date_naive();
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| {
                p.user_id == user_id
                    && p.status == PositionStatus::Closed
                    && p.exit_time.is_some_and(|t| t.date_naive() == today)
            })
            .map(|p| p.profit_loss)
            .sum())
    }
}

struct TraderRecord {
    params: TradingParams,
    credential: Option<String>,
    auto_trading: bool,
}

/// Trader directory backed by a process-local map.
#[derive(Default)]
pub struct InMemoryTraderDirectory {
    traders: RwLock<HashMap<String, TraderRecord>>,
}

impl InMemoryTraderDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trader with auto-trading enabled.
    pub async fn register(&self, user_id: &str, credential: &str, params: TradingParams) {
        self.traders.write().await.insert(
            user_id.to_string(),
            TraderRecord {
                params,
                credential: Some(credential.to_string()),
                auto_trading: true,
            },
        );
    }
}

#[async_trait]
impl TraderDirectory for InMemoryTraderDirectory {
    async fn trading_params(&self, user_id: &str) -> Result<Option<TradingParams>> {
        Ok(self
            .traders
            .read()
            .await
            .get(user_id)
            .map(|r| r.params.clone()))
    }

    async fn credential(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .traders
            .read()
            .await
            .get(user_id)
            .and_then(|r| r.credential.clone()))
    }

    async fn auto_trading_users(&self) -> Result<Vec<String>> {
        Ok(self
            .traders
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.auto_trading)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn set_auto_trading(&self, user_id: &str, enabled: bool) -> Result<()> {
        if let Some(record) = self.traders.write().await.get_mut(user_id) {
            record.auto_trading = enabled;
        }
        Ok(())
    }
}
