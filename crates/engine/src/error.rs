use pulse_trade_broker::BrokerError;
use pulse_trade_core::types::RiskAction;
use thiserror::Error;

/// Failure exits of the execution pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Signal outlived its freshness window before execution.
    #[error("stale signal: generated {age_secs}s ago")]
    StaleSignal { age_secs: i64 },

    #[error("no trading parameters for user {0}")]
    MissingParams(String),

    #[error("no stored credential for user {0}")]
    MissingCredential(String),

    #[error("auto-trading disabled for user {0}")]
    AutoTradingDisabled(String),

    #[error("concurrent position limit reached for user {0}")]
    PositionLimit(String),

    #[error("user {user_id} already holds an open position on {symbol}")]
    SymbolBusy { user_id: String, symbol: String },

    /// Daily-loss headroom left no amount to submit.
    #[error("adjusted amount exhausted by daily-loss cap")]
    CapExhausted,

    /// Vetoed by the risk gate; recorded as audit, never retried.
    #[error("risk gate rejected candidate: {action:?} ({reasons})")]
    RiskRejected { action: RiskAction, reasons: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl PipelineError {
    /// Local validation rejections: logged, never retried.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::StaleSignal { .. }
                | Self::MissingParams(_)
                | Self::MissingCredential(_)
                | Self::AutoTradingDisabled(_)
                | Self::PositionLimit(_)
                | Self::SymbolBusy { .. }
                | Self::CapExhausted
        )
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}
