//! Periodic market scanner.
//!
//! Each tick walks idle → fetching-snapshots → scoring → dispatching and
//! back to idle: fetch a snapshot per tracked symbol, score it through the
//! advisor (or the indicator fallback), and forward one candidate signal to
//! every eligible user. The debounce key is set before the signal leaves
//! the scanner, so overlapping ticks cannot double-dispatch.

use crate::advisor::{indicator_opportunity, Opportunity, SignalAdvisor};
use crate::debounce::DebounceMap;
use anyhow::Result;
use chrono::Utc;
use pulse_trade_core::circuit_breaker::CircuitBreaker;
use pulse_trade_core::config::ScannerConfig;
use pulse_trade_core::store::{MarketDataSource, PositionStore, TraderDirectory};
use pulse_trade_core::types::{CandidateSignal, MarketSnapshot, RiskLevel};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Commands accepted by the running scanner task.
#[derive(Debug)]
pub enum ScannerCommand {
    /// Force an immediate tick outside the schedule.
    ScanNow,
    /// Stop the scanner loop.
    Shutdown,
}

/// Outcome counters for one tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanReport {
    pub symbols_scanned: usize,
    pub opportunities: usize,
    pub signals_dispatched: usize,
}

/// Cloneable handle to the running scanner.
#[derive(Clone)]
pub struct ScannerHandle {
    cmd_tx: mpsc::Sender<ScannerCommand>,
    active: Arc<AtomicBool>,
    symbols: usize,
}

impl ScannerHandle {
    /// Forces one scan tick.
    ///
    /// # Errors
    /// Returns an error if the scanner task has stopped.
    pub async fn scan_now(&self) -> Result<()> {
        self.cmd_tx.send(ScannerCommand::ScanNow).await?;
        Ok(())
    }

    /// Stops the scanner loop.
    ///
    /// # Errors
    /// Returns an error if the scanner task has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.cmd_tx.send(ScannerCommand::Shutdown).await?;
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn symbols_monitored(&self) -> usize {
        self.symbols
    }
}

pub struct Scanner {
    config: ScannerConfig,
    market: Arc<dyn MarketDataSource>,
    advisor: Option<Arc<dyn SignalAdvisor>>,
    advisor_breaker: Arc<CircuitBreaker>,
    positions: Arc<dyn PositionStore>,
    directory: Arc<dyn TraderDirectory>,
    debounce: Arc<DebounceMap>,
    signal_tx: mpsc::Sender<CandidateSignal>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: ScannerConfig,
        market: Arc<dyn MarketDataSource>,
        advisor: Option<Arc<dyn SignalAdvisor>>,
        advisor_breaker: Arc<CircuitBreaker>,
        positions: Arc<dyn PositionStore>,
        directory: Arc<dyn TraderDirectory>,
        debounce: Arc<DebounceMap>,
        signal_tx: mpsc::Sender<CandidateSignal>,
    ) -> Self {
        Self {
            config,
            market,
            advisor,
            advisor_breaker,
            positions,
            directory,
            debounce,
            signal_tx,
        }
    }

    /// Spawns the scan loop and returns its handle.
    pub fn spawn(self) -> ScannerHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);
        let active = Arc::new(AtomicBool::new(true));
        let handle = ScannerHandle {
            cmd_tx,
            active: Arc::clone(&active),
            symbols: self.config.symbols.len(),
        };

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.interval_secs));
            tracing::info!(
                symbols = self.config.symbols.len(),
                interval_secs = self.config.interval_secs,
                "scanner started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.run_tick().await;
                        tracing::debug!(
                            scanned = report.symbols_scanned,
                            opportunities = report.opportunities,
                            dispatched = report.signals_dispatched,
                            "scan tick complete"
                        );
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ScannerCommand::ScanNow) => {
                            let report = self.run_tick().await;
                            tracing::info!(
                                dispatched = report.signals_dispatched,
                                "manual scan complete"
                            );
                        }
                        Some(ScannerCommand::Shutdown) | None => break,
                    },
                }
            }

            active.store(false, Ordering::SeqCst);
            tracing::info!("scanner stopped");
        });

        handle
    }

    /// Runs one full tick: fetch, score, dispatch.
    pub async fn run_tick(&self) -> ScanReport {
        let mut report = ScanReport::default();

        for symbol in &self.config.symbols {
            let symbol = symbol.as_str();
            report.symbols_scanned += 1;

            let snapshot = match self.market.snapshot(symbol).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(symbol, "snapshot fetch failed: {e:#}");
                    continue;
                }
            };

            let Some(opportunity) = self.score(&snapshot).await else {
                continue;
            };
            if opportunity.confidence < self.config.min_confidence {
                tracing::debug!(
                    symbol,
                    confidence = opportunity.confidence,
                    "opportunity below confidence floor"
                );
                continue;
            }
            if matches!(opportunity.risk_level, RiskLevel::High | RiskLevel::Critical) {
                tracing::debug!(symbol, "opportunity advised risk too high");
                continue;
            }

            report.opportunities += 1;
            report.signals_dispatched += self.dispatch(symbol, &opportunity).await;
        }

        report
    }

    /// Scores through the advisor when it is configured and its breaker
    /// closed; otherwise falls back to deterministic indicator scoring.
    async fn score(&self, snapshot: &MarketSnapshot) -> Option<Opportunity> {
        if let Some(advisor) = &self.advisor {
            if self.advisor_breaker.can_execute() {
                match advisor.score(snapshot).await {
                    Ok(opportunity) => {
                        self.advisor_breaker.on_success();
                        return Some(opportunity);
                    }
                    Err(e) => {
                        self.advisor_breaker.on_failure();
                        tracing::warn!(
                            symbol = %snapshot.symbol,
                            "advisor unavailable, using indicator fallback: {e:#}"
                        );
                    }
                }
            } else {
                tracing::debug!("advisor breaker open, using indicator fallback");
            }
        }
        indicator_opportunity(snapshot)
    }

    async fn dispatch(&self, symbol: &str, opportunity: &Opportunity) -> usize {
        let users = match self.directory.auto_trading_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("failed to enumerate auto-trading users: {e:#}");
                return 0;
            }
        };

        let mut dispatched = 0;
        for user_id in users {
            match self.try_dispatch(&user_id, symbol, opportunity).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(user = %user_id, symbol, "dispatch failed: {e:#}"),
            }
        }
        dispatched
    }

    /// Dispatches one signal to one user if every eligibility gate passes.
    /// The debounce key is taken before the send, never after.
    async fn try_dispatch(
        &self,
        user_id: &str,
        symbol: &str,
        opportunity: &Opportunity,
    ) -> Result<bool> {
        let Some(params) = self.directory.trading_params(user_id).await? else {
            return Ok(false);
        };

        let open = self.positions.open_positions(user_id).await?;
        if open.len() >= params.max_concurrent_positions {
            tracing::debug!(user = user_id, "at concurrent position limit");
            return Ok(false);
        }
        if open.iter().any(|p| p.symbol == symbol) {
            return Ok(false);
        }

        let daily_pnl = self.positions.daily_realized_pnl(user_id).await?;
        let loss_gate = params.max_daily_loss * Decimal::new(8, 1);
        if daily_pnl < Decimal::ZERO && -daily_pnl >= loss_gate {
            tracing::debug!(user = user_id, %daily_pnl, "within 80% of daily loss limit");
            return Ok(false);
        }

        if !self.debounce.try_acquire(user_id, symbol) {
            return Ok(false);
        }

        let signal = CandidateSignal {
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            direction: opportunity.direction,
            amount: params.position_size,
            duration_secs: params.trade_duration_secs,
            confidence: opportunity.confidence,
            generated_at: Utc::now(),
        };

        if self.signal_tx.send(signal).await.is_err() {
            tracing::warn!(user = user_id, symbol, "signal channel closed, dropping candidate");
            return Ok(false);
        }

        tracing::info!(
            user = user_id,
            symbol,
            confidence = opportunity.confidence,
            "candidate signal dispatched"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::Opportunity;
    use async_trait::async_trait;
    use pulse_trade_core::circuit_breaker::CircuitBreakerConfig;
    use pulse_trade_core::store::{InMemoryPositionStore, InMemoryTraderDirectory};
    use pulse_trade_core::types::{
        CloseReason, Position, PositionStatus, TradeDirection, TradingParams,
    };
    use rust_decimal_macros::dec;

    struct StaticMarket {
        volatility: f64,
        history: Vec<Decimal>,
    }

    #[async_trait]
    impl MarketDataSource for StaticMarket {
        async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
            Ok(MarketSnapshot {
                symbol: symbol.to_string(),
                current: *self.history.last().unwrap(),
                history: self.history.clone(),
                volatility: self.volatility,
                fetched_at: Utc::now(),
            })
        }
    }

    struct FixedAdvisor(Opportunity);

    #[async_trait]
    impl SignalAdvisor for FixedAdvisor {
        async fn score(&self, _snapshot: &MarketSnapshot) -> Result<Opportunity> {
            Ok(self.0.clone())
        }
    }

    struct FailingAdvisor;

    #[async_trait]
    impl SignalAdvisor for FailingAdvisor {
        async fn score(&self, _snapshot: &MarketSnapshot) -> Result<Opportunity> {
            anyhow::bail!("advisor offline")
        }
    }

    fn flat_market() -> Arc<StaticMarket> {
        Arc::new(StaticMarket {
            volatility: 0.1,
            history: vec![dec!(1.0); 20],
        })
    }

    fn falling_market() -> Arc<StaticMarket> {
        let history = (0i64..20)
            .map(|i| dec!(1.0) - Decimal::new(i, 3))
            .collect();
        Arc::new(StaticMarket { volatility: 0.1, history })
    }

    fn good_opportunity() -> Opportunity {
        Opportunity {
            direction: TradeDirection::Call,
            confidence: 0.85,
            risk_level: RiskLevel::Low,
            reasoning: "test".to_string(),
        }
    }

    struct Fixture {
        scanner: Scanner,
        signal_rx: mpsc::Receiver<CandidateSignal>,
        positions: Arc<InMemoryPositionStore>,
        directory: Arc<InMemoryTraderDirectory>,
        breaker: Arc<CircuitBreaker>,
    }

    fn fixture(
        market: Arc<dyn MarketDataSource>,
        advisor: Option<Arc<dyn SignalAdvisor>>,
    ) -> Fixture {
        let positions = Arc::new(InMemoryPositionStore::new());
        let directory = Arc::new(InMemoryTraderDirectory::new());
        let breaker = Arc::new(CircuitBreaker::new("advisor", CircuitBreakerConfig::default()));
        let debounce = Arc::new(DebounceMap::new(Duration::from_secs(300)));
        let (signal_tx, signal_rx) = mpsc::channel(64);

        let config = ScannerConfig {
            symbols: vec!["R_100".to_string()],
            ..ScannerConfig::default()
        };

        let scanner = Scanner::new(
            config,
            market,
            advisor,
            Arc::clone(&breaker),
            positions.clone() as Arc<dyn PositionStore>,
            directory.clone() as Arc<dyn TraderDirectory>,
            debounce,
            signal_tx,
        );
        Fixture { scanner, signal_rx, positions, directory, breaker }
    }

    fn open_position(user: &str, symbol: &str) -> Position {
        Position {
            id: format!("{user}-{symbol}"),
            user_id: user.to_string(),
            symbol: symbol.to_string(),
            direction: TradeDirection::Call,
            amount: dec!(10),
            entry_spot: dec!(1.0),
            current_spot: dec!(1.0),
            profit_loss: Decimal::ZERO,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            exit_time: None,
            duration_secs: 300,
            broker_contract_id: None,
            close_reason: None,
        }
    }

    #[tokio::test]
    async fn each_eligible_user_gets_exactly_one_signal() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(good_opportunity()));
        let mut fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;
        fx.directory.register("u2", "t2", TradingParams::default()).await;

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.signals_dispatched, 2);

        let first = fx.signal_rx.recv().await.unwrap();
        let second = fx.signal_rx.recv().await.unwrap();
        let mut users = vec![first.user_id, second.user_id];
        users.sort();
        assert_eq!(users, vec!["u1", "u2"]);
        assert_eq!(first.symbol, "R_100");
        assert!(fx.signal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn debounce_blocks_second_tick() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(good_opportunity()));
        let mut fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        let first = fx.scanner.run_tick().await;
        assert_eq!(first.signals_dispatched, 1);

        let second = fx.scanner.run_tick().await;
        assert_eq!(second.signals_dispatched, 0);

        assert!(fx.signal_rx.recv().await.is_some());
        assert!(fx.signal_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn low_confidence_opportunity_is_not_dispatched() {
        let mut opp = good_opportunity();
        opp.confidence = 0.5;
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(opp));
        let fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.opportunities, 0);
        assert_eq!(report.signals_dispatched, 0);
    }

    #[tokio::test]
    async fn high_advised_risk_is_not_dispatched() {
        let mut opp = good_opportunity();
        opp.risk_level = RiskLevel::High;
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(opp));
        let fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.signals_dispatched, 0);
    }

    #[tokio::test]
    async fn user_at_position_limit_is_skipped() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(good_opportunity()));
        let fx = fixture(flat_market(), Some(advisor));
        let params = TradingParams { max_concurrent_positions: 2, ..TradingParams::default() };
        fx.directory.register("u1", "t1", params).await;

        fx.positions.save_position(&open_position("u1", "R_25")).await.unwrap();
        fx.positions.save_position(&open_position("u1", "R_75")).await.unwrap();

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.signals_dispatched, 0);
    }

    #[tokio::test]
    async fn open_position_on_symbol_blocks_dispatch() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(good_opportunity()));
        let fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        fx.positions.save_position(&open_position("u1", "R_100")).await.unwrap();

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.signals_dispatched, 0);
    }

    #[tokio::test]
    async fn user_near_daily_loss_limit_is_skipped() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FixedAdvisor(good_opportunity()));
        let fx = fixture(flat_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        // Realized -80 today against a 100 limit: exactly at the 80% gate.
        let mut lost = open_position("u1", "R_25");
        lost.close(dec!(0.2), Utc::now(), CloseReason::StopLossTriggered);
        fx.positions.save_position(&lost).await.unwrap();
        assert_eq!(fx.positions.daily_realized_pnl("u1").await.unwrap(), dec!(-8));

        // -8 is under the gate for the default 100 limit; tighten the limit.
        let tight = TradingParams { max_daily_loss: dec!(10), ..TradingParams::default() };
        fx.directory.register("u1", "t1", tight).await;

        let report = fx.scanner.run_tick().await;
        assert_eq!(report.signals_dispatched, 0);
    }

    #[tokio::test]
    async fn advisor_failure_falls_back_to_indicators() {
        let advisor: Arc<dyn SignalAdvisor> = Arc::new(FailingAdvisor);
        let mut fx = fixture(falling_market(), Some(advisor));
        fx.directory.register("u1", "t1", TradingParams::default()).await;

        let report = fx.scanner.run_tick().await;

        // Fallback scored the oversold series and dispatched anyway.
        assert_eq!(report.signals_dispatched, 1);
        assert_eq!(fx.breaker.failure_count(), 1);

        let signal = fx.signal_rx.recv().await.unwrap();
        assert_eq!(signal.direction, TradeDirection::Call);
    }
}
