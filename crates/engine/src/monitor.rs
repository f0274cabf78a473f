//! Position supervision.
//!
//! Each open position gets its own iterative loop: refresh the spot price
//! through the connection manager, recompute profit/loss, persist, then
//! evaluate close conditions in fixed priority order. The loop reschedules
//! itself; nothing recurses. A tick on an already-closed position returns
//! immediately and issues no broker calls.

use crate::error::PipelineError;
use crate::events::EngineEvent;
use crate::pipeline::ExecutionPipeline;
use chrono::Utc;
use pulse_trade_broker::transport::TransportFactory;
use pulse_trade_broker::BrokerError;
use pulse_trade_core::types::{CloseReason, Position, PositionStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Result of one supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Position stays open; reschedule.
    Continue,
    /// Position was closed by this tick.
    Closed,
    /// Position was already closed; nothing done.
    AlreadyClosed,
    /// Position record is gone; stop supervising.
    Missing,
}

impl<F: TransportFactory> ExecutionPipeline<F> {
    /// Spawns the supervision loop for a position after the initial delay.
    pub fn spawn_supervision(self: &Arc<Self>, position_id: String) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(
                pipeline.config.monitor_initial_delay_secs,
            ))
            .await;

            let interval = Duration::from_secs(pipeline.config.monitor_interval_secs);
            let mut consecutive_errors: u32 = 0;

            loop {
                match pipeline.supervise_tick(&position_id).await {
                    Ok(TickOutcome::Continue) => {
                        consecutive_errors = 0;
                        tokio::time::sleep(interval).await;
                    }
                    Ok(_) => break,
                    Err(e) => {
                        consecutive_errors += 1;
                        tracing::error!(
                            position = %position_id,
                            attempt = consecutive_errors,
                            "supervision tick failed: {e}"
                        );
                        if consecutive_errors >= pipeline.config.submit_retry.max_attempts {
                            // Safe decision: stop acting on the position and
                            // hand it to a human instead of guessing.
                            pipeline.emit(EngineEvent::ManualReviewRequired {
                                position_id: position_id.clone(),
                                detail: format!("supervision kept failing: {e}"),
                                timestamp: Utc::now(),
                            });
                            tracing::error!(
                                position = %position_id,
                                "supervision abandoned, flagged for manual review"
                            );
                            break;
                        }
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        });
    }

    /// Runs one supervision pass over the position.
    ///
    /// # Errors
    /// Propagates price-refresh and storage failures; the caller's loop
    /// bounds how often those are retried.
    pub async fn supervise_tick(&self, position_id: &str) -> Result<TickOutcome, PipelineError> {
        let Some(mut position) = self
            .positions
            .position(position_id)
            .await
            .map_err(PipelineError::storage)?
        else {
            tracing::warn!(position = position_id, "supervised position disappeared");
            return Ok(TickOutcome::Missing);
        };

        if position.status == PositionStatus::Closed {
            return Ok(TickOutcome::AlreadyClosed);
        }

        // Refresh the spot and persist the updated mark.
        let spot = self.manager.market_tick(&position.symbol).await?;
        position.refresh_spot(spot);
        self.positions
            .save_position(&position)
            .await
            .map_err(PipelineError::storage)?;

        let params = self
            .directory
            .trading_params(&position.user_id)
            .await
            .map_err(PipelineError::storage)?
            .unwrap_or_default();
        let daily_pnl = self
            .positions
            .daily_realized_pnl(&position.user_id)
            .await
            .map_err(PipelineError::storage)?;

        // Close conditions, fixed priority order.
        if params.max_daily_loss > rust_decimal::Decimal::ZERO
            && daily_pnl + position.profit_loss <= -params.max_daily_loss
        {
            self.close_position(&mut position, CloseReason::DailyLossLimitExceeded)
                .await;
            self.emergency_stop(&position.user_id, "daily loss limit exceeded")
                .await;
            return Ok(TickOutcome::Closed);
        }

        if position.profit_loss >= position.amount * params.take_profit_pct {
            self.close_position(&mut position, CloseReason::TakeProfitReached)
                .await;
            return Ok(TickOutcome::Closed);
        }

        if position.profit_loss <= -(position.amount * params.stop_loss_pct) {
            self.close_position(&mut position, CloseReason::StopLossTriggered)
                .await;
            return Ok(TickOutcome::Closed);
        }

        if position.is_expired(Utc::now()) {
            self.close_position(&mut position, CloseReason::DurationExpired)
                .await;
            return Ok(TickOutcome::Closed);
        }

        Ok(TickOutcome::Continue)
    }

    /// Closes a position: best-effort sell at the broker, then the local
    /// record is marked closed regardless, so a dead contract can never
    /// keep a position open forever.
    pub(crate) async fn close_position(&self, position: &mut Position, reason: CloseReason) {
        if let Some(contract_id) = position.broker_contract_id.clone() {
            let sell = self
                .config
                .submit_retry
                .run(
                    "close_contract",
                    || self.manager.close_contract(&position.user_id, &contract_id),
                    BrokerError::is_transient,
                )
                .await;
            match sell {
                Ok(sold_for) => {
                    tracing::debug!(position = %position.id, %sold_for, "contract sold");
                }
                Err(e) => {
                    tracing::error!(
                        position = %position.id,
                        contract = %contract_id,
                        "close request failed, recording close locally: {e}"
                    );
                }
            }
        }

        position.close(position.current_spot, Utc::now(), reason);
        if let Err(e) = self.positions.save_position(position).await {
            tracing::error!(position = %position.id, "failed to persist close: {e:#}");
        }

        self.counters.positions_closed.fetch_add(1, Ordering::SeqCst);
        self.emit(EngineEvent::PositionClosed {
            user_id: position.user_id.clone(),
            position_id: position.id.clone(),
            reason,
            profit_loss: position.profit_loss,
            timestamp: Utc::now(),
        });
        tracing::info!(
            user = %position.user_id,
            position = %position.id,
            reason = %reason,
            pnl = %position.profit_loss,
            "position closed"
        );
    }
}
