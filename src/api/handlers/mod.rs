//! Request handlers

mod health;
mod leader;

pub use health::{health_handler, liveness_handler, readiness_handler, HealthResponse};
pub use leader::{leader_handler, token_handler, TokenResponse, LEADER_MESSAGE, NOT_LEADER_MESSAGE};
