//! Interactive device setup over HTTP
//!
//! Each handler drives one stage of the lifecycle through the host. Answers
//! use the same tables as the configuration file: connection parameters by
//! name, settings by entry id. A rejected answer leaves the session where it
//! was, so the client corrects the reported fields and posts again.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use monisens_core::{EntryId, SensorCatalog};
use monisens_module::{ComError, LifecycleState, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::host::{Host, StepError};
use crate::registry;
use crate::state::AppState;

/// Answer table posted for a setup stage
#[derive(Debug, Default, Deserialize)]
pub struct AnswerRequest {
    #[serde(default)]
    pub values: BTreeMap<String, toml::Value>,
}

/// Error body of a setup stage
#[derive(Debug, Serialize)]
struct SetupError {
    error: String,
    /// Whether posting again, possibly after redoing an earlier stage, can succeed
    retryable: bool,
    /// Entries the validator rejected
    #[serde(skip_serializing_if = "Vec::is_empty")]
    invalid_ids: Vec<EntryId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
}

fn step_error(err: &StepError) -> axum::response::Response {
    let mut body = SetupError {
        error: err.to_string(),
        retryable: false,
        invalid_ids: Vec::new(),
        violations: Vec::new(),
    };

    let status = match err {
        StepError::Draft(_) => {
            body.retryable = true;
            StatusCode::BAD_REQUEST
        }
        StepError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StepError::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        StepError::Session { source, .. } => {
            body.retryable = source.is_retryable();
            match source {
                SessionError::Validation(e) => {
                    body.invalid_ids = e.ids();
                    body.violations = e.violations.iter().map(ToString::to_string).collect();
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                SessionError::Com(ComError::InvalidParameters) => StatusCode::UNPROCESSABLE_ENTITY,
                SessionError::Com(ComError::ConnectionFailed) => {
                    body.error = format!("{}; retry the connection", err);
                    StatusCode::BAD_GATEWAY
                }
                SessionError::IllegalCall { .. } => StatusCode::CONFLICT,
                SessionError::Run(_) => StatusCode::BAD_GATEWAY,
                SessionError::Naming(_) | SessionError::Module(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        }
    };

    (status, Json(body)).into_response()
}

/// Initialize the module; returns the connection schema
pub async fn init_device(State(host): State<Arc<Host>>) -> impl IntoResponse {
    match host.begin().await {
        Ok(schema) => Json(schema).into_response(),
        Err(e) => step_error(&e),
    }
}

/// Connect with the posted parameters; returns the configuration schema
pub async fn connect_device(
    State(host): State<Arc<Host>>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    match host.connect(&req.values).await {
        Ok(schema) => Json(schema).into_response(),
        Err(e) => {
            warn!(error = %e, "Connect request rejected");
            step_error(&e)
        }
    }
}

/// Apply the posted settings and start acquisition; returns the sensors
pub async fn configure_device(
    State(host): State<Arc<Host>>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    let sensors = match host.configure(&req.values).await {
        Ok(sensors) => sensors,
        Err(e) => {
            warn!(error = %e, "Configure request rejected");
            return step_error(&e);
        }
    };

    match host.start(SensorCatalog::new(&sensors)).await {
        Ok(()) => Json(sensors).into_response(),
        Err(e) => step_error(&e),
    }
}

#[derive(Serialize)]
struct InterruptResponse {
    state: LifecycleState,
}

/// Abandon the device and start over with a fresh module instance
pub async fn interrupt_device(
    State(state): State<Arc<AppState>>,
    State(host): State<Arc<Host>>,
) -> impl IntoResponse {
    let module = match registry::instantiate(&state.config.device.module) {
        Ok(module) => module,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SetupError {
                    error: e.to_string(),
                    retryable: false,
                    invalid_ids: Vec::new(),
                    violations: Vec::new(),
                }),
            )
                .into_response()
        }
    };

    match host.interrupt(module).await {
        Ok(()) => {
            info!(device = %state.config.device.name, "Setup interrupted over the API");
            let current = state.status.read().await.state;
            Json(InterruptResponse { state: current }).into_response()
        }
        Err(e) => step_error(&e),
    }
}
