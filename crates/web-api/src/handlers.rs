use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pulse_trade_core::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use pulse_trade_core::store::PositionStore;
use pulse_trade_engine::{EngineHandle, EngineStatus};
use pulse_trade_scanner::ScannerHandle;
use serde::Serialize;
use std::sync::Arc;

/// Shared state injected into every handler.
pub struct ApiState {
    pub engine: EngineHandle,
    pub scanner: ScannerHandle,
    pub breakers: Vec<Arc<CircuitBreaker>>,
    pub positions: Arc<dyn PositionStore>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub active: bool,
    pub symbols_monitored: usize,
    pub store_connected: bool,
    pub circuit_breakers: Vec<BreakerSnapshot>,
    pub engine: EngineStatus,
}

/// Reports pipeline liveness, monitored symbols, store health, and breaker
/// states.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the engine cannot be
/// queried.
pub async fn status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let engine = state
        .engine
        .status()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StatusResponse {
        active: state.scanner.is_active() && engine.active,
        symbols_monitored: state.scanner.symbols_monitored(),
        store_connected: state.positions.healthy().await,
        circuit_breakers: state.breakers.iter().map(|b| b.snapshot()).collect(),
        engine,
    }))
}

/// Forces one scanner tick.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the scanner has stopped.
pub async fn trigger_scan(State(state): State<Arc<ApiState>>) -> Result<StatusCode, StatusCode> {
    state
        .scanner
        .scan_now()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(StatusCode::ACCEPTED)
}

/// Forces an emergency stop for the user.
///
/// # Errors
/// Returns `StatusCode::SERVICE_UNAVAILABLE` if the engine has stopped.
pub async fn emergency_stop(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    tracing::warn!(user = %user_id, "emergency stop requested via API");
    state
        .engine
        .emergency_stop(&user_id, "manual API trigger")
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(StatusCode::ACCEPTED)
}
