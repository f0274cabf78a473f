//! Minimal brokerage wire protocol.
//!
//! Requests are JSON objects carrying a monotonically increasing `req_id`;
//! responses are tagged by `msg_type` and correlated back through the
//! echoed `req_id`. Only the shapes needed to drive the pipeline exist
//! here.

use pulse_trade_core::types::TradeDirection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Contract parameters for a buy request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractParams {
    pub contract_type: TradeDirection,
    pub symbol: String,
    pub amount: Decimal,
    pub duration: u64,
    pub duration_unit: String,
}

impl ContractParams {
    /// Second-denominated contract for the given trade.
    #[must_use]
    pub fn seconds(
        contract_type: TradeDirection,
        symbol: impl Into<String>,
        amount: Decimal,
        duration_secs: u64,
    ) -> Self {
        Self {
            contract_type,
            symbol: symbol.into(),
            amount,
            duration: duration_secs,
            duration_unit: "s".to_string(),
        }
    }
}

/// Outbound request bodies.
#[derive(Debug, Clone)]
pub enum BrokerRequest {
    Authorize { token: String },
    Ticks { symbol: String },
    Buy { parameters: ContractParams },
    Sell { contract_id: String },
}

impl BrokerRequest {
    /// Serializes the request with the given request id.
    #[must_use]
    pub fn to_message(&self, req_id: u64) -> Value {
        match self {
            Self::Authorize { token } => json!({ "authorize": token, "req_id": req_id }),
            Self::Ticks { symbol } => json!({ "ticks": symbol, "subscribe": 1, "req_id": req_id }),
            Self::Buy { parameters } => json!({ "buy": 1, "parameters": parameters, "req_id": req_id }),
            Self::Sell { contract_id } => json!({ "sell": contract_id, "req_id": req_id }),
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::Ticks { .. } => "ticks",
            Self::Buy { .. } => "buy",
            Self::Sell { .. } => "sell",
        }
    }
}

/// Typed inbound events, the tagged union published on the session channel.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Authorized {
        login_id: String,
        balance: Decimal,
        echo_req_id: Option<u64>,
    },
    Tick {
        symbol: String,
        quote: Decimal,
        epoch: i64,
        echo_req_id: Option<u64>,
    },
    BuyAck {
        contract_id: String,
        buy_price: Decimal,
        echo_req_id: Option<u64>,
    },
    SellAck {
        contract_id: String,
        sold_for: Decimal,
        echo_req_id: Option<u64>,
    },
    Rejected {
        code: String,
        message: String,
        echo_req_id: Option<u64>,
    },
    /// Transport closed; terminal for the session.
    Disconnected,
}

impl BrokerEvent {
    /// The request id this event answers, if any.
    #[must_use]
    pub fn echo_req_id(&self) -> Option<u64> {
        match self {
            Self::Authorized { echo_req_id, .. }
            | Self::Tick { echo_req_id, .. }
            | Self::BuyAck { echo_req_id, .. }
            | Self::SellAck { echo_req_id, .. }
            | Self::Rejected { echo_req_id, .. } => *echo_req_id,
            Self::Disconnected => None,
        }
    }
}

#[derive(Deserialize)]
struct AuthorizePayload {
    loginid: String,
    balance: Decimal,
}

#[derive(Deserialize)]
struct TickPayload {
    symbol: String,
    quote: Decimal,
    epoch: i64,
}

#[derive(Deserialize)]
struct BuyPayload {
    contract_id: String,
    buy_price: Decimal,
}

#[derive(Deserialize)]
struct SellPayload {
    contract_id: String,
    sold_for: Decimal,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

/// Parses one raw frame into a typed event.
///
/// Unknown message types are logged and dropped (`None`), never fatal.
#[must_use]
pub fn parse_event(raw: &str) -> Option<BrokerEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("unparseable broker frame: {e}");
            return None;
        }
    };

    let echo_req_id = value.get("req_id").and_then(Value::as_u64);

    if let Some(err) = value.get("error") {
        let payload: ErrorPayload = serde_json::from_value(err.clone()).ok()?;
        return Some(BrokerEvent::Rejected {
            code: payload.code,
            message: payload.message,
            echo_req_id,
        });
    }

    let msg_type = value.get("msg_type").and_then(Value::as_str)?;
    match msg_type {
        "authorize" => {
            let payload: AuthorizePayload =
                serde_json::from_value(value.get("authorize")?.clone()).ok()?;
            Some(BrokerEvent::Authorized {
                login_id: payload.loginid,
                balance: payload.balance,
                echo_req_id,
            })
        }
        "tick" => {
            let payload: TickPayload = serde_json::from_value(value.get("tick")?.clone()).ok()?;
            Some(BrokerEvent::Tick {
                symbol: payload.symbol,
                quote: payload.quote,
                epoch: payload.epoch,
                echo_req_id,
            })
        }
        "buy" => {
            let payload: BuyPayload = serde_json::from_value(value.get("buy")?.clone()).ok()?;
            Some(BrokerEvent::BuyAck {
                contract_id: payload.contract_id,
                buy_price: payload.buy_price,
                echo_req_id,
            })
        }
        "sell" => {
            let payload: SellPayload = serde_json::from_value(value.get("sell")?.clone()).ok()?;
            Some(BrokerEvent::SellAck {
                contract_id: payload.contract_id,
                sold_for: payload.sold_for,
                echo_req_id,
            })
        }
        other => {
            tracing::debug!(msg_type = other, "dropping unhandled broker message");
            None
        }
    }
}
