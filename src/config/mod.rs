//! # Configuration Management
//!
//! Configuration is read from `KEYHOLDER_*` environment variables. A `.env`
//! file, when present, is loaded by the binary before this runs. Values that
//! are present but malformed are rejected rather than defaulted.

mod settings;

pub use settings::{
    ApiServerConfig, Config, LeadershipConfig, ObservabilityConfig, PublisherConfig,
    SecretStoreKind, TokenFileConfig,
};

use crate::errors::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;

const ENV_PREFIX: &str = "KEYHOLDER_";

fn var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {ENV_PREFIX}{name} '{}': {}", raw, e))),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::config(format!("Invalid {ENV_PREFIX}{name} '{}': expected a boolean", raw))),
        },
        None => Ok(default),
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let api = ApiServerConfig {
            bind_address: var("API_BIND_ADDRESS").unwrap_or(defaults.api.bind_address),
            port: parse_var("API_PORT", defaults.api.port)?,
        };

        let token_file = TokenFileConfig {
            token_path: var("TOKEN_PATH").map(PathBuf::from).unwrap_or(defaults.token_file.token_path),
            watch_dir: var("WATCH_DIR").map(PathBuf::from),
            debounce_ms: parse_var("WATCH_DEBOUNCE_MS", defaults.token_file.debounce_ms)?,
            stop_timeout_ms: parse_var("WATCH_STOP_TIMEOUT_MS", defaults.token_file.stop_timeout_ms)?,
        };

        let p = defaults.publisher;
        let publisher = PublisherConfig {
            secret_name: var("SECRET_NAME").unwrap_or(p.secret_name),
            secret_key: var("SECRET_KEY").unwrap_or(p.secret_key),
            namespace: var("SECRET_NAMESPACE"),
            field_manager: var("FIELD_MANAGER").unwrap_or(p.field_manager),
            store: parse_var("SECRET_STORE", p.store)?,
            auth_url: var("AUTH_URL"),
            auth_timeout_secs: parse_var("AUTH_TIMEOUT_SECS", p.auth_timeout_secs)?,
            queue_capacity: parse_var("PUBLISH_QUEUE", p.queue_capacity)?,
            max_attempts: parse_var("PUBLISH_MAX_ATTEMPTS", p.max_attempts)?,
            initial_backoff_ms: parse_var("PUBLISH_BACKOFF_MS", p.initial_backoff_ms)?,
            max_backoff_ms: parse_var("PUBLISH_MAX_BACKOFF_MS", p.max_backoff_ms)?,
        };

        let l = defaults.leadership;
        let leadership = LeadershipConfig {
            assume_leader: parse_bool("ASSUME_LEADER", l.assume_leader)?,
            lease_name: var("LEASE_NAME"),
            lease_namespace: var("LEASE_NAMESPACE"),
            // Pod name, as the kubelet sets it for the hostname
            lease_identity: var("LEASE_IDENTITY").or_else(|| std::env::var("HOSTNAME").ok()),
            lease_duration_secs: parse_var("LEASE_DURATION_SECS", l.lease_duration_secs)?,
            lease_grace_secs: parse_var("LEASE_GRACE_SECS", l.lease_grace_secs)?,
        };

        let o = defaults.observability;
        let observability = ObservabilityConfig {
            service_name: var("SERVICE_NAME").unwrap_or(o.service_name),
            log_level: var("LOG_LEVEL").unwrap_or(o.log_level),
            json_logging: parse_bool("JSON_LOGGING", o.json_logging)?,
            enable_metrics: parse_bool("ENABLE_METRICS", o.enable_metrics)?,
            metrics_port: parse_var("METRICS_PORT", o.metrics_port)?,
        };

        let config = Self { api, token_file, publisher, leadership, observability };
        config.validate()?;
        Ok(config)
    }
}

impl std::fmt::Display for SecretStoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretStoreKind::Kubernetes => write!(f, "kubernetes"),
            SecretStoreKind::Memory => write!(f, "memory"),
        }
    }
}
