//! Leadership and token diagnostics

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::routes::ApiState;

pub const LEADER_MESSAGE: &str = "The current leader is... me!";
pub const NOT_LEADER_MESSAGE: &str = "I am not the leader.";

/// Cached token as shown on `/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: Option<String>,
}

/// Whether this replica is the leader
pub async fn leader_handler(State(state): State<ApiState>) -> &'static str {
    if state.leadership.is_leader() {
        LEADER_MESSAGE
    } else {
        NOT_LEADER_MESSAGE
    }
}

/// Current cached token, for diagnostics only
pub async fn token_handler(State(state): State<ApiState>) -> Json<TokenResponse> {
    let token = state.cache.get().map(|credential| credential.expose().to_string());
    Json(TokenResponse { token })
}
