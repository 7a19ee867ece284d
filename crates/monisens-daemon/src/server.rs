//! Status server setup and routing

use anyhow::Result;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::host::Host;
use crate::setup;
use crate::state::AppState;
use crate::ws;

/// Router state; handlers extract the part they need
#[derive(Clone)]
pub struct ServerState {
    pub app: Arc<AppState>,
    pub host: Arc<Host>,
}

impl FromRef<ServerState> for Arc<AppState> {
    fn from_ref(state: &ServerState) -> Self {
        state.app.clone()
    }
}

impl FromRef<ServerState> for Arc<Host> {
    fn from_ref(state: &ServerState) -> Self {
        state.host.clone()
    }
}

pub fn router(app: Arc<AppState>, host: Arc<Host>) -> Router {
    Router::new()
        .route("/api/session", get(api::get_session))
        .route("/api/schema/connection", get(api::get_connection_schema))
        .route("/api/schema/device", get(api::get_device_schema))
        .route("/api/sensors", get(api::list_sensors))
        .route("/api/readings", get(api::list_readings))
        // Interactive setup
        .route("/api/setup/init", post(setup::init_device))
        .route("/api/setup/connect", post(setup::connect_device))
        .route("/api/setup/configure", post(setup::configure_device))
        .route("/api/setup/interrupt", post(setup::interrupt_device))
        // WebSocket for live telemetry
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ServerState { app, host })
}

/// Serve the API until the process ends
pub async fn run(app: Arc<AppState>, host: Arc<Host>, bind: &str) -> Result<()> {
    let router = router(app, host);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting status server");
    axum::serve(listener, router).await?;
    Ok(())
}
