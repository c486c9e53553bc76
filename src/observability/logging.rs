//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level; JSON output is opt-in.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, ObservabilityConfig};

/// Initialise logging. Returns `false` if a subscriber was already installed
/// (e.g. by a test harness), which is not an error.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.is_ok()
}

/// Create a tracing span for a publish attempt
#[macro_export]
macro_rules! publish_span {
    ($term:expr) => {
        tracing::info_span!(
            "publish_credential",
            term = $term,
            attempt_id = %uuid::Uuid::new_v4()
        )
    };
    ($term:expr, $($field:tt)*) => {
        tracing::info_span!(
            "publish_credential",
            term = $term,
            attempt_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &Config) {
    tracing::info!(
        api_address = %config.api.bind_address(),
        token_path = %config.token_file.token_path.display(),
        watch_dir = %config.token_file.watch_dir().display(),
        debounce_ms = config.token_file.debounce_ms,
        secret_name = %config.publisher.secret_name,
        secret_store = %config.publisher.store,
        namespace = config.publisher.namespace.as_deref().unwrap_or("<own>"),
        auth_url_configured = config.publisher.auth_url.is_some(),
        max_attempts = config.publisher.max_attempts,
        lease = config.leadership.lease_name.as_deref().unwrap_or("<none>"),
        assume_leader = config.leadership.assume_leader,
        metrics_enabled = config.observability.enable_metrics,
        "keyholder configuration"
    );
}
