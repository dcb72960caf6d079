//! Health check endpoint
//!
//! Always answers 200, whatever the model state, so the process manager can
//! tell a live but still-loading worker from a dead one.

use std::panic::{catch_unwind, AssertUnwindSafe};

use axum::{extract::State, http::StatusCode, Json};
use breedvision::lifecycle::StatusSnapshot;
use breedvision::utils::error::truncate_message;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::state::SharedState;

/// Longest error message echoed by the catch-all response
pub const MAX_HEALTH_ERROR_LEN: usize = 200;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// `unloaded`, `loading`, `ready` or `failed`
    pub model_state: String,
    pub model_loaded: bool,
    pub model_loading: bool,
    pub model_load_error: Option<String>,
    pub device: String,
    pub load_attempts: u32,
    pub architecture: Option<String>,
    /// RFC 3339 time the first load attempt was claimed
    pub loading_started_at: Option<String>,
    /// RFC 3339 time the model became ready
    pub ready_at: Option<String>,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Health body for a state snapshot
pub fn health_response(snapshot: &StatusSnapshot, device: &str, uptime_seconds: u64) -> HealthResponse {
    HealthResponse {
        status: "ok".to_string(),
        model_state: snapshot.state.name().to_string(),
        model_loaded: snapshot.model_loaded(),
        model_loading: snapshot.model_loading(),
        model_load_error: snapshot.model_load_error().map(String::from),
        device: device.to_string(),
        load_attempts: snapshot.load_attempts,
        architecture: snapshot.architecture.clone(),
        loading_started_at: snapshot.loading_started_at.map(|t| t.to_rfc3339()),
        ready_at: snapshot.ready_at.map(|t| t.to_rfc3339()),
        uptime_seconds,
        version: breedvision::VERSION.to_string(),
    }
}

/// Body returned when reading the state itself failed
pub fn health_failure(message: &str) -> Value {
    json!({
        "status": "error",
        "error": truncate_message(message, MAX_HEALTH_ERROR_LEN),
    })
}

/// GET /health - Model load status
pub async fn health_check(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        state
            .controller
            .snapshot()
            .map(|snapshot| health_response(&snapshot, &state.device, state.uptime_seconds()))
    }));

    let body = match result {
        Ok(Ok(response)) => serde_json::to_value(response)
            .unwrap_or_else(|e| health_failure(&format!("failed to encode health: {}", e))),
        Ok(Err(e)) => {
            error!("Health check could not read model state: {}", e);
            health_failure(&e.to_string())
        }
        Err(_) => {
            error!("Health check panicked");
            health_failure("health check panicked")
        }
    };

    (StatusCode::OK, Json(body))
}
