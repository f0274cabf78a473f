//! End-to-end pipeline tests against a scripted broker transport whose
//! spot price the tests control directly.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use pulse_trade_broker::error::BrokerError;
use pulse_trade_broker::manager::ConnectionManager;
use pulse_trade_broker::transport::{BrokerTransport, TransportFactory};
use pulse_trade_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use pulse_trade_core::config::EngineConfig;
use pulse_trade_core::retry::RetryPolicy;
use pulse_trade_core::store::{
    InMemoryPositionStore, InMemoryTraderDirectory, MarketDataSource, PositionStore,
    TraderDirectory,
};
use pulse_trade_core::types::{
    CandidateSignal, CloseReason, MarketSnapshot, Position, PositionStatus, TradeDirection,
    TradingParams,
};
use pulse_trade_engine::{ExecutionPipeline, PipelineError, TickOutcome};
use pulse_trade_scanner::DebounceMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// Scripted broker
// =============================================================================

#[derive(Debug)]
struct Script {
    price: Decimal,
    ticks_served: u32,
    buys: u32,
    sells: u32,
    fail_sells: bool,
    next_contract: u64,
}

impl Script {
    fn new(price: Decimal) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            price,
            ticks_served: 0,
            buys: 0,
            sells: 0,
            fail_sells: false,
            next_contract: 1,
        }))
    }
}

struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: mpsc::UnboundedReceiver<String>,
}

fn value_to_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap_or(Decimal::ZERO),
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn send(&mut self, text: String) -> Result<(), BrokerError> {
        let request: Value = serde_json::from_str(&text).unwrap();
        let req_id = request.get("req_id").and_then(Value::as_u64).unwrap_or(0);
        let mut script = self.script.lock();

        let reply = if let Some(token) = request.get("authorize").and_then(Value::as_str) {
            json!({
                "msg_type": "authorize",
                "authorize": { "loginid": token, "balance": 10000.0 },
                "req_id": req_id,
            })
        } else if let Some(symbol) = request.get("ticks").and_then(Value::as_str) {
            script.ticks_served += 1;
            json!({
                "msg_type": "tick",
                "tick": { "symbol": symbol, "quote": script.price, "epoch": Utc::now().timestamp() },
                "req_id": req_id,
            })
        } else if request.get("buy").is_some() {
            script.buys += 1;
            let amount = request
                .pointer("/parameters/amount")
                .map_or(Decimal::ZERO, value_to_decimal);
            let contract_id = format!("C{}", script.next_contract);
            script.next_contract += 1;
            json!({
                "msg_type": "buy",
                "buy": { "contract_id": contract_id, "buy_price": amount },
                "req_id": req_id,
            })
        } else if request.get("sell").is_some() {
            script.sells += 1;
            if script.fail_sells {
                json!({
                    "error": { "code": "MarketClosed", "message": "sell rejected" },
                    "msg_type": "sell",
                    "req_id": req_id,
                })
            } else {
                json!({
                    "msg_type": "sell",
                    "sell": { "contract_id": "C0", "sold_for": script.price },
                    "req_id": req_id,
                })
            }
        } else {
            json!({
                "error": { "code": "UnrecognisedRequest", "message": "unsupported" },
                "req_id": req_id,
            })
        };

        let _ = self.inbox_tx.send(reply.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, BrokerError> {
        Ok(self.inbox_rx.recv().await)
    }

    async fn shutdown(&mut self) {
        self.inbox_rx.close();
    }
}

struct ScriptedFactory {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    type Transport = ScriptedTransport;

    async fn connect(&self) -> Result<ScriptedTransport, BrokerError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(ScriptedTransport {
            script: Arc::clone(&self.script),
            inbox_tx,
            inbox_rx,
        })
    }
}

struct ScriptedMarket {
    script: Arc<Mutex<Script>>,
    volatility: f64,
}

#[async_trait]
impl MarketDataSource for ScriptedMarket {
    async fn snapshot(&self, symbol: &str) -> anyhow::Result<MarketSnapshot> {
        let price = self.script.lock().price;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current: price,
            history: vec![price; 20],
            volatility: self.volatility,
            fetched_at: Utc::now(),
        })
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    pipeline: Arc<ExecutionPipeline<ScriptedFactory>>,
    script: Arc<Mutex<Script>>,
    positions: Arc<InMemoryPositionStore>,
    directory: Arc<InMemoryTraderDirectory>,
}

fn fixture(volatility: f64) -> Fixture {
    let script = Script::new(dec!(1.000));
    let positions = Arc::new(InMemoryPositionStore::new());
    let directory = Arc::new(InMemoryTraderDirectory::new());
    let debounce = Arc::new(DebounceMap::new(Duration::from_secs(300)));

    let breaker = Arc::new(CircuitBreaker::new("broker", CircuitBreakerConfig::default()));
    let manager = Arc::new(ConnectionManager::new(
        ScriptedFactory { script: Arc::clone(&script) },
        breaker,
        Duration::from_secs(5),
    ));
    let market = Arc::new(ScriptedMarket {
        script: Arc::clone(&script),
        volatility,
    });

    let config = EngineConfig {
        dispatch_delay_secs: 0,
        monitor_interval_secs: 1,
        // Keep background supervision quiet; tests drive ticks by hand.
        monitor_initial_delay_secs: 3600,
        submit_retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        },
    };

    let pipeline = Arc::new(ExecutionPipeline::new(
        config,
        300,
        manager,
        market as Arc<dyn MarketDataSource>,
        positions.clone() as Arc<dyn PositionStore>,
        directory.clone() as Arc<dyn TraderDirectory>,
        debounce,
    ));

    Fixture { pipeline, script, positions, directory }
}

fn signal(user: &str, symbol: &str, amount: Decimal) -> CandidateSignal {
    CandidateSignal {
        user_id: user.to_string(),
        symbol: symbol.to_string(),
        direction: TradeDirection::Call,
        amount,
        duration_secs: 300,
        confidence: 0.85,
        generated_at: Utc::now(),
    }
}

fn open_position(id: &str, user: &str, symbol: &str, amount: Decimal) -> Position {
    Position {
        id: id.to_string(),
        user_id: user.to_string(),
        symbol: symbol.to_string(),
        direction: TradeDirection::Call,
        amount,
        entry_spot: dec!(1.000),
        current_spot: dec!(1.000),
        profit_loss: Decimal::ZERO,
        status: PositionStatus::Open,
        entry_time: Utc::now(),
        exit_time: None,
        duration_secs: 300,
        broker_contract_id: Some("C99".to_string()),
        close_reason: None,
    }
}

fn closed_position_with_pnl(id: &str, user: &str, profit_loss: Decimal) -> Position {
    Position {
        id: id.to_string(),
        user_id: user.to_string(),
        symbol: "R_OLD".to_string(),
        direction: TradeDirection::Call,
        amount: dec!(100),
        entry_spot: dec!(1.0),
        current_spot: dec!(1.0),
        profit_loss,
        status: PositionStatus::Closed,
        entry_time: Utc::now() - ChronoDuration::minutes(30),
        exit_time: Some(Utc::now()),
        duration_secs: 300,
        broker_contract_id: None,
        close_reason: Some(CloseReason::StopLossTriggered),
    }
}

// =============================================================================
// Execution tests
// =============================================================================

#[tokio::test]
async fn signal_executes_into_open_position() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    let position = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap();

    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(position.entry_spot, dec!(1.000));
    assert!(position.broker_contract_id.is_some());

    let open = fx.positions.open_positions("u1").await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, position.id);
    assert_eq!(fx.script.lock().buys, 1);
}

#[tokio::test]
async fn stale_signal_is_rejected() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    let mut stale = signal("u1", "R_100", dec!(10));
    stale.generated_at = Utc::now() - ChronoDuration::seconds(301);

    let err = fx.pipeline.execute_signal(stale).await.unwrap_err();
    assert!(matches!(err, PipelineError::StaleSignal { .. }));
    assert!(err.is_validation());
    assert_eq!(fx.script.lock().buys, 0);
}

#[tokio::test]
async fn unknown_user_is_rejected() {
    let fx = fixture(0.1);

    let err = fx.pipeline.execute_signal(signal("ghost", "R_100", dec!(10))).await.unwrap_err();
    assert!(matches!(err, PipelineError::AutoTradingDisabled(_)));
}

#[tokio::test]
async fn second_signal_on_same_symbol_is_rejected() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap();
    let err = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap_err();

    assert!(matches!(err, PipelineError::SymbolBusy { .. }));
    assert_eq!(fx.positions.open_positions("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_position_limit_is_enforced() {
    let fx = fixture(0.1);
    let params = TradingParams { max_concurrent_positions: 1, ..TradingParams::default() };
    fx.directory.register("u1", "tok-1", params).await;

    fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap();
    let err = fx.pipeline.execute_signal(signal("u1", "R_50", dec!(10))).await.unwrap_err();

    assert!(matches!(err, PipelineError::PositionLimit(_)));
    assert_eq!(fx.positions.open_positions("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn high_risk_candidate_is_halted() {
    // 15% of the 10k balance in a 45%-volatility market.
    let fx = fixture(0.45);
    let params = TradingParams {
        max_daily_loss_amount: dec!(10000),
        ..TradingParams::default()
    };
    fx.directory.register("u1", "tok-1", params).await;

    let err = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(1500))).await.unwrap_err();

    assert!(matches!(err, PipelineError::RiskRejected { .. }));
    assert!(fx.positions.open_positions("u1").await.unwrap().is_empty());
    assert_eq!(fx.script.lock().buys, 0);
}

#[tokio::test]
async fn medium_risk_reduces_amount_before_submission() {
    // 6% of balance at 35% volatility scores into the reduce band.
    let fx = fixture(0.35);
    let params = TradingParams {
        max_daily_loss_amount: dec!(10000),
        ..TradingParams::default()
    };
    fx.directory.register("u1", "tok-1", params).await;

    let position = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(600))).await.unwrap();

    assert_eq!(position.amount, dec!(420.00));
}

#[tokio::test]
async fn daily_loss_cap_clamps_adjusted_amount() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    // 95 already lost today against a 100 cap leaves 5 of headroom.
    fx.positions
        .save_position(&closed_position_with_pnl("old", "u1", dec!(-95)))
        .await
        .unwrap();

    let position = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap();
    assert_eq!(position.amount, dec!(5));
}

// =============================================================================
// Supervision tests
// =============================================================================

#[tokio::test]
async fn stop_loss_closes_at_ten_percent_adverse_move() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;
    fx.positions
        .save_position(&open_position("p1", "u1", "R_100", dec!(100)))
        .await
        .unwrap();

    fx.script.lock().price = dec!(0.895);
    let outcome = fx.pipeline.supervise_tick("p1").await.unwrap();
    assert_eq!(outcome, TickOutcome::Closed);

    let closed = fx.positions.position("p1").await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::StopLossTriggered));
    assert_eq!(closed.profit_loss, dec!(-10.5));
    assert!(closed.exit_time.is_some());
}

#[tokio::test]
async fn take_profit_closes_at_exact_threshold() {
    // Closure triggers at >=, not only >.
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;
    fx.positions
        .save_position(&open_position("p1", "u1", "R_100", dec!(100)))
        .await
        .unwrap();

    fx.script.lock().price = dec!(1.100);
    let outcome = fx.pipeline.supervise_tick("p1").await.unwrap();
    assert_eq!(outcome, TickOutcome::Closed);

    let closed = fx.positions.position("p1").await.unwrap().unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::TakeProfitReached));
    assert_eq!(closed.profit_loss, dec!(10.0));
}

#[tokio::test]
async fn flat_position_keeps_monitoring_until_expiry() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    let mut position = open_position("p1", "u1", "R_100", dec!(100));
    fx.positions.save_position(&position).await.unwrap();

    assert_eq!(fx.pipeline.supervise_tick("p1").await.unwrap(), TickOutcome::Continue);

    // Rewind the entry past the contract duration.
    position.entry_time = Utc::now() - ChronoDuration::seconds(301);
    fx.positions.save_position(&position).await.unwrap();

    assert_eq!(fx.pipeline.supervise_tick("p1").await.unwrap(), TickOutcome::Closed);
    let closed = fx.positions.position("p1").await.unwrap().unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::DurationExpired));
}

#[tokio::test]
async fn supervising_closed_position_is_a_no_op() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    let mut position = open_position("p1", "u1", "R_100", dec!(100));
    position.close(dec!(1.05), Utc::now(), CloseReason::TakeProfitReached);
    fx.positions.save_position(&position).await.unwrap();

    let ticks_before = fx.script.lock().ticks_served;
    let sells_before = fx.script.lock().sells;

    let outcome = fx.pipeline.supervise_tick("p1").await.unwrap();

    assert_eq!(outcome, TickOutcome::AlreadyClosed);
    assert_eq!(fx.script.lock().ticks_served, ticks_before);
    assert_eq!(fx.script.lock().sells, sells_before);
}

#[tokio::test]
async fn daily_loss_breach_closes_and_emergency_stops() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    // Realized -111 today; the open position is +10, so the total sits at
    // -101 against a 100 limit. Daily-loss priority beats take-profit.
    fx.positions
        .save_position(&closed_position_with_pnl("old", "u1", dec!(-111)))
        .await
        .unwrap();
    fx.positions
        .save_position(&open_position("p1", "u1", "R_100", dec!(100)))
        .await
        .unwrap();

    fx.script.lock().price = dec!(1.100);
    let outcome = fx.pipeline.supervise_tick("p1").await.unwrap();
    assert_eq!(outcome, TickOutcome::Closed);

    let closed = fx.positions.position("p1").await.unwrap().unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::DailyLossLimitExceeded));

    // The user is out of the auto-trading roster until re-enabled.
    assert!(!fx.directory.auto_trading_enabled("u1").await.unwrap());
}

#[tokio::test]
async fn emergency_stop_closes_every_position_best_effort() {
    let fx = fixture(0.1);
    fx.directory.register("u1", "tok-1", TradingParams::default()).await;

    // One position through the real pipeline (so a session exists), one
    // seeded directly.
    let executed = fx.pipeline.execute_signal(signal("u1", "R_100", dec!(10))).await.unwrap();
    fx.positions
        .save_position(&open_position("p2", "u1", "R_50", dec!(10)))
        .await
        .unwrap();

    // Every sell is rejected; positions must still close locally, and one
    // failure must not stop the next close attempt.
    fx.script.lock().fail_sells = true;

    fx.pipeline.emergency_stop("u1", "manual trigger").await;

    for id in [executed.id.as_str(), "p2"] {
        let closed = fx.positions.position(id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.close_reason, Some(CloseReason::EmergencyStop));
    }
    assert_eq!(fx.script.lock().sells, 2);
    assert!(!fx.directory.auto_trading_enabled("u1").await.unwrap());
    assert!(fx.positions.open_positions("u1").await.unwrap().is_empty());
}
