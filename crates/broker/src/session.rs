//! Per-user broker session, run as an actor owning its transport.
//!
//! All sends for one user flow through the session's command channel, so
//! access to the transport is serialized per user. Inbound frames resolve
//! pending request acks by echoed `req_id` and are re-published as typed
//! events on the manager's broadcast channel.

use crate::error::BrokerError;
use crate::prices::PriceCache;
use crate::protocol::{parse_event, BrokerEvent};
use crate::transport::BrokerTransport;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// A typed event tagged with the session it arrived on.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub user_id: String,
    pub event: BrokerEvent,
}

pub(crate) enum SessionCommand {
    Send {
        text: String,
        req_id: u64,
        ack: oneshot::Sender<Result<BrokerEvent, BrokerError>>,
    },
    Close,
}

/// Shared session state visible through the handle.
pub struct SessionInfo {
    connected: AtomicBool,
    next_req_id: AtomicU64,
    subscriptions: parking_lot::Mutex<HashSet<String>>,
    balance: parking_lot::Mutex<Option<Decimal>>,
}

impl SessionInfo {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            next_req_id: AtomicU64::new(1),
            subscriptions: parking_lot::Mutex::new(HashSet::new()),
            balance: parking_lot::Mutex::new(None),
        }
    }
}

/// Cloneable handle to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    user_id: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
    info: Arc<SessionInfo>,
}

impl SessionHandle {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.info.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_connected(&self) {
        self.info.connected.store(true, Ordering::SeqCst);
    }

    /// Next monotonically increasing request id for this session.
    #[must_use]
    pub fn next_req_id(&self) -> u64 {
        self.info.next_req_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Account balance reported at authorization, if any.
    #[must_use]
    pub fn balance(&self) -> Option<Decimal> {
        *self.info.balance.lock()
    }

    pub(crate) fn set_balance(&self, balance: Decimal) {
        *self.info.balance.lock() = Some(balance);
    }

    #[must_use]
    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.info.subscriptions.lock().contains(symbol)
    }

    pub(crate) fn mark_subscribed(&self, symbol: &str) {
        self.info.subscriptions.lock().insert(symbol.to_string());
    }

    /// Queues a raw frame and returns the ack receiver for its `req_id`.
    pub(crate) async fn send_raw(
        &self,
        text: String,
        req_id: u64,
    ) -> Result<oneshot::Receiver<Result<BrokerEvent, BrokerError>>, BrokerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Send { text, req_id, ack: ack_tx })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;
        Ok(ack_rx)
    }

    pub(crate) async fn close(&self) {
        self.info.connected.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(SessionCommand::Close).await;
    }
}

/// Spawns the session actor and returns its handle.
pub(crate) fn spawn_session<T: BrokerTransport>(
    user_id: String,
    transport: T,
    event_tx: broadcast::Sender<SessionEvent>,
    prices: Arc<PriceCache>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let info = Arc::new(SessionInfo::new());
    let handle = SessionHandle {
        user_id: user_id.clone(),
        cmd_tx,
        info: Arc::clone(&info),
    };

    tokio::spawn(run_session(user_id, transport, cmd_rx, event_tx, prices, info));
    handle
}

async fn run_session<T: BrokerTransport>(
    user_id: String,
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    prices: Arc<PriceCache>,
    info: Arc<SessionInfo>,
) {
    let mut pending: HashMap<u64, oneshot::Sender<Result<BrokerEvent, BrokerError>>> =
        HashMap::new();

    // The select only picks the next step; the transport itself is touched
    // afterwards, so the two branches never hold it at the same time.
    enum Step {
        Cmd(Option<SessionCommand>),
        Frame(Result<Option<String>, BrokerError>),
    }

    loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => Step::Cmd(cmd),
            frame = transport.recv() => Step::Frame(frame),
        };

        match step {
            Step::Cmd(Some(SessionCommand::Send { text, req_id, ack })) => {
                match transport.send(text).await {
                    Ok(()) => {
                        pending.insert(req_id, ack);
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                    }
                }
            }
            Step::Cmd(Some(SessionCommand::Close) | None) => {
                tracing::info!(user = %user_id, "session closing");
                break;
            }
            Step::Frame(Ok(Some(raw))) => {
                let Some(event) = parse_event(&raw) else { continue };

                if let BrokerEvent::Tick { symbol, quote, .. } = &event {
                    prices.record(symbol, *quote);
                }

                if let Some(req_id) = event.echo_req_id() {
                    if let Some(ack) = pending.remove(&req_id) {
                        let reply = match &event {
                            BrokerEvent::Rejected { code, message, .. } => {
                                Err(BrokerError::Rejected {
                                    code: code.clone(),
                                    message: message.clone(),
                                })
                            }
                            other => Ok(other.clone()),
                        };
                        let _ = ack.send(reply);
                    }
                }

                let _ = event_tx.send(SessionEvent {
                    user_id: user_id.clone(),
                    event,
                });
            }
            Step::Frame(Ok(None)) => {
                tracing::warn!(user = %user_id, "broker transport closed");
                break;
            }
            Step::Frame(Err(e)) => {
                tracing::warn!(user = %user_id, "broker transport error: {e}");
                break;
            }
        }
    }

    // Teardown: fail anything still waiting, then announce the disconnect.
    info.connected.store(false, Ordering::SeqCst);
    for (_, ack) in pending.drain() {
        let _ = ack.send(Err(BrokerError::ChannelClosed));
    }
    let _ = event_tx.send(SessionEvent {
        user_id: user_id.clone(),
        event: BrokerEvent::Disconnected,
    });
    transport.shutdown().await;
}
