//! Connection manager: one live brokerage session per user.
//!
//! Owns the session map, enforces the one-session-per-user invariant
//! (connecting supersedes and closes any prior session), and wraps every
//! outbound call in the broker circuit breaker. Reconnection is the
//! caller's responsibility; the manager never reconnects on its own.

use crate::error::BrokerError;
use crate::prices::PriceCache;
use crate::protocol::{BrokerEvent, BrokerRequest, ContractParams};
use crate::session::{spawn_session, SessionEvent, SessionHandle};
use crate::transport::TransportFactory;
use pulse_trade_core::circuit_breaker::CircuitBreaker;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Reserved session id for the unauthorized market-data feed.
const MARKET_USER: &str = "_market";

pub struct ConnectionManager<F: TransportFactory> {
    factory: F,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    breaker: Arc<CircuitBreaker>,
    event_tx: broadcast::Sender<SessionEvent>,
    prices: Arc<PriceCache>,
    call_timeout: Duration,
}

impl<F: TransportFactory> ConnectionManager<F> {
    #[must_use]
    pub fn new(factory: F, breaker: Arc<CircuitBreaker>, call_timeout: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            factory,
            sessions: RwLock::new(HashMap::new()),
            breaker,
            event_tx,
            prices: Arc::new(PriceCache::new()),
            call_timeout,
        }
    }

    /// Subscribes to the typed event stream across all sessions.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Establishes an authorized session for the user, superseding and
    /// closing any prior one.
    ///
    /// # Errors
    /// Fails fast with `ServiceUnavailable` while the breaker is open, or
    /// with the transport/authorization failure otherwise.
    pub async fn connect(&self, user_id: &str, token: &str) -> Result<(), BrokerError> {
        // Hold the write lock across the whole handover so concurrent
        // connects for one user cannot leave two live sessions.
        let mut sessions = self.sessions.write().await;
        if let Some(old) = sessions.remove(user_id) {
            tracing::info!(user = user_id, "superseding existing session");
            old.close().await;
        }

        let handle = self.open_session(user_id).await?;
        let reply = self
            .send_on(&handle, BrokerRequest::Authorize { token: token.to_string() })
            .await?;
        match reply {
            BrokerEvent::Authorized { login_id, balance, .. } => {
                tracing::info!(user = user_id, login = %login_id, %balance, "session authorized");
                handle.set_balance(balance);
                handle.mark_connected();
            }
            other => {
                return Err(BrokerError::Transport(format!(
                    "unexpected reply to authorize: {other:?}"
                )));
            }
        }

        sessions.insert(user_id.to_string(), handle);
        Ok(())
    }

    /// Reuses the user's live session or establishes a new one.
    ///
    /// # Errors
    /// Same failure modes as [`Self::connect`].
    pub async fn ensure_session(&self, user_id: &str, token: &str) -> Result<(), BrokerError> {
        if let Some(handle) = self.sessions.read().await.get(user_id) {
            if handle.is_connected() {
                return Ok(());
            }
        }
        self.connect(user_id, token).await
    }

    /// Sends a request on the user's session and awaits the correlated ack.
    ///
    /// # Errors
    /// `NotConnected` without a session; `ServiceUnavailable` while the
    /// breaker is open; `Timeout`/`Transport` on wire failures; `Rejected`
    /// when the broker answers with a business error.
    pub async fn send(
        &self,
        user_id: &str,
        request: BrokerRequest,
    ) -> Result<BrokerEvent, BrokerError> {
        let handle = self.handle_for(user_id).await?;
        self.send_on(&handle, request).await
    }

    /// Subscribes the user's session to a tick stream (idempotent).
    ///
    /// # Errors
    /// Same failure modes as [`Self::send`].
    pub async fn subscribe(&self, user_id: &str, symbol: &str) -> Result<(), BrokerError> {
        let handle = self.handle_for(user_id).await?;
        if handle.is_subscribed(symbol) {
            return Ok(());
        }
        self.send_on(&handle, BrokerRequest::Ticks { symbol: symbol.to_string() })
            .await?;
        handle.mark_subscribed(symbol);
        Ok(())
    }

    /// Submits a buy and returns `(contract_id, buy_price)` from the ack.
    ///
    /// # Errors
    /// Same failure modes as [`Self::send`].
    pub async fn submit_buy(
        &self,
        user_id: &str,
        parameters: ContractParams,
    ) -> Result<(String, Decimal), BrokerError> {
        match self.send(user_id, BrokerRequest::Buy { parameters }).await? {
            BrokerEvent::BuyAck { contract_id, buy_price, .. } => Ok((contract_id, buy_price)),
            other => Err(BrokerError::Transport(format!(
                "unexpected reply to buy: {other:?}"
            ))),
        }
    }

    /// Sells a contract and returns the realized sale price.
    ///
    /// # Errors
    /// Same failure modes as [`Self::send`].
    pub async fn close_contract(
        &self,
        user_id: &str,
        contract_id: &str,
    ) -> Result<Decimal, BrokerError> {
        let request = BrokerRequest::Sell { contract_id: contract_id.to_string() };
        match self.send(user_id, request).await? {
            BrokerEvent::SellAck { sold_for, .. } => Ok(sold_for),
            other => Err(BrokerError::Transport(format!(
                "unexpected reply to sell: {other:?}"
            ))),
        }
    }

    /// Tears down the user's session, if any.
    pub async fn close(&self, user_id: &str) {
        if let Some(handle) = self.sessions.write().await.remove(user_id) {
            handle.close().await;
            tracing::info!(user = user_id, "session closed");
        }
    }

    /// Requests a fresh quote over the shared market-data session.
    ///
    /// # Errors
    /// Same failure modes as [`Self::send`], plus the connect failures of
    /// the market session itself.
    pub async fn market_tick(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        self.ensure_market_session().await?;
        let handle = self.handle_for(MARKET_USER).await?;
        match self
            .send_on(&handle, BrokerRequest::Ticks { symbol: symbol.to_string() })
            .await?
        {
            BrokerEvent::Tick { quote, .. } => Ok(quote),
            other => Err(BrokerError::Transport(format!(
                "unexpected reply to ticks: {other:?}"
            ))),
        }
    }

    /// Most recent cached quote for the symbol.
    #[must_use]
    pub fn latest_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.latest(symbol).map(|(quote, _)| quote)
    }

    /// Up to `n` cached quotes for the symbol, oldest first.
    #[must_use]
    pub fn price_history(&self, symbol: &str, n: usize) -> Vec<Decimal> {
        self.prices.history(symbol, n)
    }

    /// Number of live user sessions (the market feed excluded).
    pub async fn session_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .keys()
            .filter(|id| *id != MARKET_USER)
            .count()
    }

    /// Balance reported when the user's session authorized.
    pub async fn account_balance(&self, user_id: &str) -> Option<Decimal> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .and_then(SessionHandle::balance)
    }

    pub async fn has_session(&self, user_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(user_id)
            .is_some_and(SessionHandle::is_connected)
    }

    async fn handle_for(&self, user_id: &str) -> Result<SessionHandle, BrokerError> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotConnected(user_id.to_string()))
    }

    /// Opens a transport behind the breaker and spawns its session actor.
    async fn open_session(&self, user_id: &str) -> Result<SessionHandle, BrokerError> {
        if !self.breaker.can_execute() {
            return Err(BrokerError::ServiceUnavailable);
        }
        let transport = match self.factory.connect().await {
            Ok(t) => {
                self.breaker.on_success();
                t
            }
            Err(e) => {
                self.breaker.on_failure();
                return Err(e);
            }
        };
        Ok(spawn_session(
            user_id.to_string(),
            transport,
            self.event_tx.clone(),
            Arc::clone(&self.prices),
        ))
    }

    /// Awaits one correlated response with breaker accounting.
    async fn send_on(
        &self,
        handle: &SessionHandle,
        request: BrokerRequest,
    ) -> Result<BrokerEvent, BrokerError> {
        if !self.breaker.can_execute() {
            return Err(BrokerError::ServiceUnavailable);
        }

        let req_id = handle.next_req_id();
        let kind = request.kind();
        let text = request.to_message(req_id).to_string();
        tracing::debug!(user = handle.user_id(), req_id, kind, "broker send");

        let ack_rx = handle.send_raw(text, req_id).await?;
        match tokio::time::timeout(self.call_timeout, ack_rx).await {
            Err(_) => {
                self.breaker.on_failure();
                Err(BrokerError::Timeout(self.call_timeout))
            }
            Ok(Err(_)) => {
                self.breaker.on_failure();
                Err(BrokerError::ChannelClosed)
            }
            Ok(Ok(Ok(event))) => {
                self.breaker.on_success();
                Ok(event)
            }
            Ok(Ok(Err(e))) => {
                // A business rejection means the wire worked; only
                // transport-level failures count against the breaker.
                if matches!(e, BrokerError::Rejected { .. }) {
                    self.breaker.on_success();
                } else {
                    self.breaker.on_failure();
                }
                Err(e)
            }
        }
    }

    async fn ensure_market_session(&self) -> Result<(), BrokerError> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(MARKET_USER) {
                return Ok(());
            }
        }
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(MARKET_USER) {
            return Ok(());
        }
        // Tick streams need no authorization.
        let handle = self.open_session(MARKET_USER).await?;
        handle.mark_connected();
        sessions.insert(MARKET_USER.to_string(), handle);
        tracing::info!("market data session established");
        Ok(())
    }
}
