//! # Observability Infrastructure
//!
//! Structured logging, Prometheus metrics, and the readiness/liveness probes
//! exposed to the orchestrator.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthStatus, LivenessProbe, ReadinessReporter};
pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when enabled, the metrics exporter
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    let installed = init_logging(config);

    if config.enable_metrics {
        init_metrics(config)?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        subscriber_installed = installed,
        "Observability initialized successfully"
    );

    Ok(())
}
