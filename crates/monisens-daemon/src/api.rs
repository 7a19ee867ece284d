//! REST API handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use monisens_core::Schema;
use serde::Serialize;
use std::sync::Arc;

use crate::state::{AppState, CounterSnapshot, SessionStatus};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

#[derive(Serialize)]
struct SessionResponse {
    #[serde(flatten)]
    status: SessionStatus,
    counters: CounterSnapshot,
}

/// Session state, module version and telemetry counters
pub async fn get_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.read().await.clone();
    Json(SessionResponse {
        status,
        counters: state.counters.snapshot(),
    })
}

fn schema_response(schema: Option<Schema>, what: &str) -> axum::response::Response {
    match schema {
        Some(schema) => Json(schema).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("{} schema not obtained yet", what))),
        )
            .into_response(),
    }
}

pub async fn get_connection_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let schema = state.status.read().await.connection_schema.clone();
    schema_response(schema, "Connection")
}

pub async fn get_device_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let schema = state.status.read().await.device_schema.clone();
    schema_response(schema, "Device configuration")
}

/// Published sensor descriptors
pub async fn list_sensors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status.read().await.sensors.clone())
}

/// Latest accepted reading per sensor
pub async fn list_readings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.latest_readings().await)
}
