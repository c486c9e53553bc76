use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::cache::SecretCache;
use crate::leadership::LeadershipState;
use crate::observability::health::{LivenessProbe, ReadinessReporter};

use super::handlers::{
    health_handler, leader_handler, liveness_handler, readiness_handler, token_handler,
};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct ApiState {
    pub leadership: Arc<LeadershipState>,
    pub cache: Arc<SecretCache>,
    pub readiness: ReadinessReporter,
    pub liveness: LivenessProbe,
}

impl ApiState {
    pub fn new(
        leadership: Arc<LeadershipState>,
        cache: Arc<SecretCache>,
        liveness: LivenessProbe,
    ) -> Self {
        let readiness = ReadinessReporter::new(Arc::clone(&cache));
        Self { leadership, cache, readiness, liveness }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/leader", get(leader_handler))
        .route("/token", get(token_handler))
        .route("/health", get(health_handler))
        .route("/health/readiness", get(readiness_handler))
        .route("/health/liveness", get(liveness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
