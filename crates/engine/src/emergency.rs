//! Emergency stop: forced halt of one user's automated trading.
//!
//! Disables further scanner dispatch (until manually re-enabled), drops
//! the user's debounce keys so delayed candidates are ignored, closes
//! every open position best-effort, and tears down the brokerage session.
//! In-flight network calls are left to complete or time out on their own.

use crate::events::EngineEvent;
use crate::pipeline::ExecutionPipeline;
use chrono::Utc;
use pulse_trade_broker::transport::TransportFactory;
use pulse_trade_core::types::CloseReason;
use std::sync::atomic::Ordering;

impl<F: TransportFactory> ExecutionPipeline<F> {
    pub async fn emergency_stop(&self, user_id: &str, reason: &str) {
        tracing::warn!(user = user_id, reason, "EMERGENCY STOP triggered");
        self.counters.emergency_stops.fetch_add(1, Ordering::SeqCst);
        self.emit(EngineEvent::EmergencyStopTriggered {
            user_id: user_id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });

        // No further automated dispatch until someone re-enables the flag.
        if let Err(e) = self.directory.set_auto_trading(user_id, false).await {
            tracing::error!(user = user_id, "failed to disable auto-trading: {e:#}");
        }

        // Pending candidates lose their debounce keys and fail the
        // auto-trading validation when their dispatch delay elapses.
        self.debounce.clear_user(user_id);

        // Close everything open, best-effort: each failure is logged on its
        // own and never aborts the remaining closes.
        match self.positions.open_positions(user_id).await {
            Ok(open) => {
                tracing::info!(
                    user = user_id,
                    count = open.len(),
                    "closing open positions for emergency stop"
                );
                for mut position in open {
                    self.close_position(&mut position, CloseReason::EmergencyStop)
                        .await;
                }
            }
            Err(e) => {
                tracing::error!(
                    user = user_id,
                    "failed to load open positions during emergency stop: {e:#}"
                );
            }
        }

        self.manager.close(user_id).await;
    }
}
