//! Health endpoints for orchestrator probes

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::routes::ApiState;
use crate::observability::health::HealthCheck;

/// Health response, actuator style
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `UP` or `DOWN`
    pub status: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, HealthResponse>,
}

impl From<&HealthCheck> for HealthResponse {
    fn from(check: &HealthCheck) -> Self {
        Self {
            status: check.status.as_str().to_string(),
            details: check.details.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            components: BTreeMap::new(),
        }
    }
}

fn status_code(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

fn respond(check: HealthCheck) -> (StatusCode, Json<HealthResponse>) {
    (status_code(check.status.is_healthy()), Json(HealthResponse::from(&check)))
}

/// Aggregated readiness and liveness
pub async fn health_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let checks = [state.readiness.check(), state.liveness.check()];
    let healthy = checks.iter().all(|check| check.status.is_healthy());

    let components =
        checks.iter().map(|check| (check.component.clone(), HealthResponse::from(check))).collect();
    let response = HealthResponse {
        status: if healthy { "UP" } else { "DOWN" }.to_string(),
        details: BTreeMap::new(),
        components,
    };
    (status_code(healthy), Json(response))
}

/// Ready exactly when a token is cached
pub async fn readiness_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    respond(state.readiness.check())
}

/// Alive until the file watcher fails
pub async fn liveness_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    respond(state.liveness.check())
}
