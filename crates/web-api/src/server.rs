use crate::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState) -> Self {
        Self { state: Arc::new(state) }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/status", get(handlers::status))
            .route("/api/scan", post(handlers::trigger_scan))
            .route(
                "/api/users/:user_id/emergency-stop",
                post(handlers::emergency_stop),
            )
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve
    /// requests.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("operational API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
