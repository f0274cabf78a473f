//! Execution pipeline for candidate signals.
//!
//! Per signal the pipeline walks received → validated → risk-checked →
//! submitted → recorded → monitoring, with failure exits at validation
//! (stale signal, missing credential, position limits) and at the risk
//! check (halt / emergency-stop verdicts, which are rejections by design,
//! not errors). Supervision is scheduled only after the broker's submit
//! acknowledgment, which fixes the ordering between the two.

use crate::commands::EngineStatus;
use crate::error::PipelineError;
use crate::events::EngineEvent;
use chrono::Utc;
use pulse_trade_broker::manager::ConnectionManager;
use pulse_trade_broker::protocol::ContractParams;
use pulse_trade_broker::transport::TransportFactory;
use pulse_trade_broker::BrokerError;
use pulse_trade_core::config::EngineConfig;
use pulse_trade_core::store::{MarketDataSource, PositionStore, TraderDirectory};
use pulse_trade_core::types::{
    AccountState, CandidateSignal, Position, PositionStatus, RiskAction,
};
use pulse_trade_risk::{MarketState, RiskGate};
use pulse_trade_scanner::DebounceMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared engine counters, updated from every pipeline task.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub active: AtomicBool,
    pub signals_received: AtomicU64,
    pub trades_executed: AtomicU64,
    pub positions_closed: AtomicU64,
    pub risk_rejections: AtomicU64,
    pub emergency_stops: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn snapshot(&self) -> EngineStatus {
        EngineStatus {
            active: self.active.load(Ordering::SeqCst),
            signals_received: self.signals_received.load(Ordering::SeqCst),
            trades_executed: self.trades_executed.load(Ordering::SeqCst),
            positions_closed: self.positions_closed.load(Ordering::SeqCst),
            risk_rejections: self.risk_rejections.load(Ordering::SeqCst),
            emergency_stops: self.emergency_stops.load(Ordering::SeqCst),
        }
    }
}

pub struct ExecutionPipeline<F: TransportFactory> {
    pub(crate) config: EngineConfig,
    pub(crate) signal_max_age_secs: u64,
    pub(crate) manager: Arc<ConnectionManager<F>>,
    pub(crate) market: Arc<dyn MarketDataSource>,
    pub(crate) positions: Arc<dyn PositionStore>,
    pub(crate) directory: Arc<dyn TraderDirectory>,
    pub(crate) gate: RiskGate,
    pub(crate) debounce: Arc<DebounceMap>,
    pub(crate) event_tx: broadcast::Sender<EngineEvent>,
    pub(crate) counters: EngineCounters,
}

impl<F: TransportFactory> ExecutionPipeline<F> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: EngineConfig,
        signal_max_age_secs: u64,
        manager: Arc<ConnectionManager<F>>,
        market: Arc<dyn MarketDataSource>,
        positions: Arc<dyn PositionStore>,
        directory: Arc<dyn TraderDirectory>,
        debounce: Arc<DebounceMap>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            config,
            signal_max_age_secs,
            manager,
            market,
            positions,
            directory,
            gate: RiskGate::new(),
            debounce,
            event_tx,
            counters: EngineCounters::default(),
        }
    }

    /// Subscribes to the engine's audit/event stream.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Runs one candidate signal through the full pipeline.
    ///
    /// On success the position is persisted (pending, then open on the
    /// broker's confirmation) and its supervision loop is spawned.
    ///
    /// # Errors
    /// Validation and risk rejections return their typed reason; broker and
    /// storage failures propagate after bounded retries.
    pub async fn execute_signal(
        self: &Arc<Self>,
        signal: CandidateSignal,
    ) -> Result<Position, PipelineError> {
        // --- received → validated -----------------------------------------
        let now = Utc::now();
        if signal.is_stale(now, self.signal_max_age_secs) {
            return Err(PipelineError::StaleSignal {
                age_secs: signal.age(now).num_seconds(),
            });
        }

        let user_id = signal.user_id.clone();
        if !self
            .directory
            .auto_trading_enabled(&user_id)
            .await
            .map_err(PipelineError::storage)?
        {
            return Err(PipelineError::AutoTradingDisabled(user_id));
        }

        let params = self
            .directory
            .trading_params(&user_id)
            .await
            .map_err(PipelineError::storage)?
            .ok_or_else(|| PipelineError::MissingParams(user_id.clone()))?;
        let credential = self
            .directory
            .credential(&user_id)
            .await
            .map_err(PipelineError::storage)?
            .ok_or_else(|| PipelineError::MissingCredential(user_id.clone()))?;

        // An eligible session is part of validation; its authorize reply
        // also carries the balance the risk check needs.
        self.manager.ensure_session(&user_id, &credential).await?;

        let open = self
            .positions
            .open_positions(&user_id)
            .await
            .map_err(PipelineError::storage)?;
        if open.len() >= params.max_concurrent_positions {
            return Err(PipelineError::PositionLimit(user_id));
        }
        if open.iter().any(|p| p.symbol == signal.symbol) {
            return Err(PipelineError::SymbolBusy {
                user_id,
                symbol: signal.symbol,
            });
        }

        // --- validated → risk-checked -------------------------------------
        let daily_pnl = self
            .positions
            .daily_realized_pnl(&user_id)
            .await
            .map_err(PipelineError::storage)?;
        let snapshot = self
            .market
            .snapshot(&signal.symbol)
            .await
            .map_err(PipelineError::storage)?;
        let balance = self
            .manager
            .account_balance(&user_id)
            .await
            .unwrap_or(Decimal::ZERO);

        let account = AccountState {
            balance,
            open_position_count: open.len(),
            daily_pnl,
            max_daily_loss: params.max_daily_loss,
            experience: params.experience,
            risk_tolerance: params.risk_tolerance,
        };
        let market = MarketState {
            volatility: snapshot.volatility,
        };
        let verdict = self.gate.assess_candidate(&signal, &account, &market);

        if !verdict.permits_execution() {
            self.counters.risk_rejections.fetch_add(1, Ordering::SeqCst);
            self.emit(EngineEvent::RiskRejected {
                user_id: user_id.clone(),
                symbol: signal.symbol.clone(),
                action: verdict.action,
                reasons: verdict.reasons.clone(),
                timestamp: Utc::now(),
            });
            tracing::info!(
                user = %user_id,
                symbol = %signal.symbol,
                score = verdict.score,
                action = ?verdict.action,
                "candidate rejected by risk gate"
            );

            if verdict.action == RiskAction::EmergencyStop {
                self.emergency_stop(&user_id, "critical pre-trade risk").await;
            }
            return Err(PipelineError::RiskRejected {
                action: verdict.action,
                reasons: verdict.reasons.join("; "),
            });
        }

        // Multiplier first, then the absolute daily-loss cap clamps the
        // adjusted amount.
        let mut amount = signal.amount;
        if verdict.action == RiskAction::Reduce {
            let multiplier =
                Decimal::try_from(verdict.size_multiplier).unwrap_or(Decimal::ONE);
            amount = (amount * multiplier).round_dp(2);
            tracing::info!(user = %user_id, %amount, "amount reduced by risk verdict");
        }
        let realized_loss = (-daily_pnl).max(Decimal::ZERO);
        let headroom = params.max_daily_loss_amount - realized_loss;
        if headroom <= Decimal::ZERO {
            return Err(PipelineError::CapExhausted);
        }
        amount = amount.min(headroom);
        if amount <= Decimal::ZERO {
            return Err(PipelineError::CapExhausted);
        }

        // --- risk-checked → submitted -------------------------------------
        let parameters = ContractParams::seconds(
            signal.direction,
            signal.symbol.clone(),
            amount,
            signal.duration_secs,
        );
        let (contract_id, buy_price) = self
            .config
            .submit_retry
            .run(
                "submit_buy",
                || self.manager.submit_buy(&user_id, parameters.clone()),
                BrokerError::is_transient,
            )
            .await?;

        // --- submitted → recorded → monitoring ----------------------------
        let mut position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            amount,
            entry_spot: snapshot.current,
            current_spot: snapshot.current,
            profit_loss: Decimal::ZERO,
            status: PositionStatus::Pending,
            entry_time: Utc::now(),
            exit_time: None,
            duration_secs: signal.duration_secs,
            broker_contract_id: Some(contract_id.clone()),
            close_reason: None,
        };
        self.positions
            .save_position(&position)
            .await
            .map_err(PipelineError::storage)?;

        // The buy ack is the broker confirmation.
        position.status = PositionStatus::Open;
        self.positions
            .save_position(&position)
            .await
            .map_err(PipelineError::storage)?;

        self.counters.trades_executed.fetch_add(1, Ordering::SeqCst);
        self.emit(EngineEvent::TradeExecuted {
            user_id: user_id.clone(),
            symbol: position.symbol.clone(),
            position_id: position.id.clone(),
            amount,
            timestamp: Utc::now(),
        });
        tracing::info!(
            user = %user_id,
            symbol = %position.symbol,
            position = %position.id,
            contract = %contract_id,
            %amount,
            %buy_price,
            "trade executed"
        );

        self.spawn_supervision(position.id.clone());
        Ok(position)
    }

    /// Current counter snapshot.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.counters.snapshot()
    }
}
