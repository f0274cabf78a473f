use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

/// Commands accepted by the running engine service.
#[derive(Debug)]
pub enum EngineCommand {
    EmergencyStop { user_id: String, reason: String },
    GetStatus(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// Counters reported on the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub active: bool,
    pub signals_received: u64,
    pub trades_executed: u64,
    pub positions_closed: u64,
    pub risk_rejections: u64,
    pub emergency_stops: u64,
}

/// Cloneable handle to the engine service.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    #[must_use]
    pub(crate) const fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    /// Forces an emergency stop for the user.
    ///
    /// # Errors
    /// Returns an error if the engine service has stopped.
    pub async fn emergency_stop(&self, user_id: &str, reason: &str) -> Result<()> {
        self.tx
            .send(EngineCommand::EmergencyStop {
                user_id: user_id.to_string(),
                reason: reason.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Fetches the engine's current counters.
    ///
    /// # Errors
    /// Returns an error if the engine service has stopped or the reply is
    /// dropped.
    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::GetStatus(tx)).await?;
        let status = rx.await?;
        Ok(status)
    }

    /// Stops the engine service.
    ///
    /// # Errors
    /// Returns an error if the engine service has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(EngineCommand::Shutdown).await?;
        Ok(())
    }
}
