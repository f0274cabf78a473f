use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the connection manager and transports.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Circuit breaker is open; the transport was not touched.
    #[error("broker service unavailable: circuit breaker open")]
    ServiceUnavailable,

    /// No live session for the user.
    #[error("no active session for user {0}")]
    NotConnected(String),

    /// Bounded wait for a response elapsed.
    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure (socket error, handshake failure).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The broker answered with a business-level rejection.
    #[error("broker rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The session actor went away mid-request.
    #[error("session channel closed")]
    ChannelClosed,
}

impl BrokerError {
    /// Whether a bounded retry is worth attempting.
    ///
    /// Business rejections and missing sessions are not transient, and an
    /// open breaker should fail fast rather than spin.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::ChannelClosed
        )
    }
}
