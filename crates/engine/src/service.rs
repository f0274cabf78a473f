//! Engine service: consumes dispatched signals and control commands.
//!
//! Each accepted signal is executed on its own task after the configured
//! dispatch delay, so a slow submission never blocks the intake loop.
//! Any error that escapes the pipeline is caught here, at the task
//! boundary: the safe outcome is simply that no position is opened.

use crate::commands::{EngineCommand, EngineHandle};
use crate::error::PipelineError;
use crate::events::EngineEvent;
use crate::pipeline::ExecutionPipeline;
use chrono::Utc;
use pulse_trade_broker::transport::TransportFactory;
use pulse_trade_core::types::CandidateSignal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct EngineService<F: TransportFactory> {
    pipeline: Arc<ExecutionPipeline<F>>,
    signal_rx: mpsc::Receiver<CandidateSignal>,
}

impl<F: TransportFactory> EngineService<F> {
    #[must_use]
    pub fn new(
        pipeline: Arc<ExecutionPipeline<F>>,
        signal_rx: mpsc::Receiver<CandidateSignal>,
    ) -> Self {
        Self { pipeline, signal_rx }
    }

    /// Spawns the service loop and returns its handle.
    pub fn spawn(self) -> EngineHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(32);
        let handle = EngineHandle::new(cmd_tx);

        tokio::spawn(async move {
            let mut signal_rx = self.signal_rx;
            let pipeline = self.pipeline;
            pipeline.counters.active.store(true, Ordering::SeqCst);
            tracing::info!("execution engine started");

            loop {
                tokio::select! {
                    signal = signal_rx.recv() => match signal {
                        Some(signal) => Self::handle_signal(&pipeline, signal),
                        None => {
                            tracing::warn!("signal channel closed, stopping engine");
                            break;
                        }
                    },
                    cmd = cmd_rx.recv() => match cmd {
                        Some(EngineCommand::EmergencyStop { user_id, reason }) => {
                            pipeline.emergency_stop(&user_id, &reason).await;
                        }
                        Some(EngineCommand::GetStatus(tx)) => {
                            let _ = tx.send(pipeline.status());
                        }
                        Some(EngineCommand::Shutdown) | None => break,
                    },
                }
            }

            pipeline.counters.active.store(false, Ordering::SeqCst);
            tracing::info!("execution engine stopped");
        });

        handle
    }

    /// Schedules one signal for execution after the dispatch delay; the
    /// staleness re-check happens inside the pipeline once the delay ends.
    fn handle_signal(pipeline: &Arc<ExecutionPipeline<F>>, signal: CandidateSignal) {
        pipeline
            .counters
            .signals_received
            .fetch_add(1, Ordering::SeqCst);
        pipeline.emit(EngineEvent::SignalReceived {
            user_id: signal.user_id.clone(),
            symbol: signal.symbol.clone(),
            timestamp: Utc::now(),
        });

        let pipeline = Arc::clone(pipeline);
        let delay = Duration::from_secs(pipeline.config.dispatch_delay_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let user = signal.user_id.clone();
            let symbol = signal.symbol.clone();
            match pipeline.execute_signal(signal).await {
                Ok(position) => {
                    tracing::debug!(
                        user = %user,
                        symbol = %symbol,
                        position = %position.id,
                        "signal executed"
                    );
                }
                Err(e) if e.is_validation() => {
                    tracing::info!(user = %user, symbol = %symbol, "signal rejected: {e}");
                }
                // Already recorded as an audit event by the pipeline.
                Err(PipelineError::RiskRejected { .. }) => {}
                Err(e) => {
                    tracing::error!(
                        user = %user,
                        symbol = %symbol,
                        "signal execution failed, no position opened: {e}"
                    );
                }
            }
        });
    }
}
