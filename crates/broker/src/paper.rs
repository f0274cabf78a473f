//! In-process paper broker.
//!
//! Answers the wire protocol locally with synthetic fills and a
//! deterministic price walk, so the pipeline runs end to end without
//! credentials. Doubles as the transport used by tests.

use crate::error::BrokerError;
use crate::transport::{BrokerTransport, TransportFactory};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Transport that answers every request itself.
pub struct PaperTransport {
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: mpsc::UnboundedReceiver<String>,
    steps: HashMap<String, u64>,
    contracts: HashMap<String, Decimal>,
    next_contract: u64,
}

impl PaperTransport {
    #[must_use]
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inbox_tx,
            inbox_rx,
            steps: HashMap::new(),
            contracts: HashMap::new(),
            next_contract: 1,
        }
    }

    /// Deterministic bounded walk around 1.0, advanced once per tick request.
    fn next_quote(&mut self, symbol: &str) -> Decimal {
        let step = self.steps.entry(symbol.to_string()).or_insert(0);
        *step += 1;
        let px = 1.0 + 0.01 * (*step as f64 * 0.7).sin();
        Decimal::try_from(px).unwrap_or(Decimal::ONE).round_dp(4)
    }

    fn reply(&self, value: Value) {
        // Receiver lives in the same struct; send cannot fail while we exist.
        let _ = self.inbox_tx.send(value.to_string());
    }

    fn handle(&mut self, request: &Value) {
        let req_id = request.get("req_id").and_then(Value::as_u64).unwrap_or(0);

        if let Some(token) = request.get("authorize").and_then(Value::as_str) {
            let login = if token.is_empty() { "paper" } else { token };
            self.reply(json!({
                "msg_type": "authorize",
                "authorize": { "loginid": login, "balance": 10000.0 },
                "req_id": req_id,
            }));
        } else if let Some(symbol) = request.get("ticks").and_then(Value::as_str) {
            let quote = self.next_quote(symbol);
            self.reply(json!({
                "msg_type": "tick",
                "tick": {
                    "symbol": symbol,
                    "quote": quote,
                    "epoch": chrono::Utc::now().timestamp(),
                },
                "req_id": req_id,
            }));
        } else if request.get("buy").is_some() {
            let amount = request
                .pointer("/parameters/amount")
                .map_or(Decimal::ZERO, decimal_from_value);
            let contract_id = format!("P{}", self.next_contract);
            self.next_contract += 1;
            self.contracts.insert(contract_id.clone(), amount);
            self.reply(json!({
                "msg_type": "buy",
                "buy": { "contract_id": contract_id, "buy_price": amount },
                "req_id": req_id,
            }));
        } else if let Some(contract_id) = request.get("sell").and_then(Value::as_str) {
            match self.contracts.remove(contract_id) {
                Some(buy_price) => self.reply(json!({
                    "msg_type": "sell",
                    "sell": { "contract_id": contract_id, "sold_for": buy_price },
                    "req_id": req_id,
                })),
                None => self.reply(json!({
                    "error": { "code": "ContractNotFound", "message": format!("unknown contract {contract_id}") },
                    "msg_type": "sell",
                    "req_id": req_id,
                })),
            }
        } else {
            self.reply(json!({
                "error": { "code": "UnrecognisedRequest", "message": "unsupported request" },
                "req_id": req_id,
            }));
        }
    }
}

impl Default for PaperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for PaperTransport {
    async fn send(&mut self, text: String) -> Result<(), BrokerError> {
        let request: Value = serde_json::from_str(&text)
            .map_err(|e| BrokerError::Transport(format!("paper broker got invalid json: {e}")))?;
        self.handle(&request);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, BrokerError> {
        Ok(self.inbox_rx.recv().await)
    }

    async fn shutdown(&mut self) {
        self.inbox_rx.close();
    }
}

/// Amounts arrive as JSON strings or numbers depending on the serializer.
fn decimal_from_value(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap_or(Decimal::ZERO),
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Factory producing independent paper transports.
#[derive(Default)]
pub struct PaperFactory;

impl PaperFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for PaperFactory {
    type Transport = PaperTransport;

    async fn connect(&self) -> Result<PaperTransport, BrokerError> {
        Ok(PaperTransport::new())
    }
}
