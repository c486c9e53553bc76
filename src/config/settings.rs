//! # Configuration Settings
//!
//! Defines the configuration structure for the keyholder sidecar.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct Config {
    /// HTTP API configuration
    #[validate(nested)]
    pub api: ApiServerConfig,

    /// Token file and watcher configuration
    #[validate(nested)]
    pub token_file: TokenFileConfig,

    /// Credential publication configuration
    #[validate(nested)]
    pub publisher: PublisherConfig,

    /// Leadership provider configuration
    #[validate(nested)]
    pub leadership: LeadershipConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    /// Cross-field checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.observability.enable_metrics && self.observability.metrics_port == self.api.port {
            return Err(Error::config("API and metrics ports cannot be the same"));
        }

        if self.token_file.token_path.file_name().is_none() {
            return Err(Error::config(format!(
                "Token path '{}' must name a file",
                self.token_file.token_path.display()
            )));
        }

        if !is_dns_subdomain(&self.publisher.secret_name) {
            return Err(Error::config(format!(
                "Secret name '{}' is not a valid DNS-1123 subdomain",
                self.publisher.secret_name
            )));
        }

        if self.publisher.max_backoff_ms < self.publisher.initial_backoff_ms {
            return Err(Error::config("Publish max backoff must be >= initial backoff"));
        }

        if let Some(lease_name) = &self.leadership.lease_name {
            // The lease bridge delivers its initial "not leader" state, which
            // would immediately revoke a static grant.
            if self.leadership.assume_leader {
                return Err(Error::config(
                    "KEYHOLDER_ASSUME_LEADER cannot be combined with lease election",
                ));
            }
            if !is_dns_subdomain(lease_name) {
                return Err(Error::config(format!(
                    "Lease name '{}' is not a valid DNS-1123 subdomain",
                    lease_name
                )));
            }
            if self.leadership.lease_grace_secs >= self.leadership.lease_duration_secs {
                return Err(Error::config("Lease grace period must be shorter than the lease duration"));
            }
        }

        Ok(())
    }
}

fn is_dns_subdomain(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric())
}

/// HTTP API server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiServerConfig {
    /// Bind address
    #[validate(length(min = 1, message = "API bind address cannot be empty"))]
    pub bind_address: String,

    /// Listening port
    #[validate(range(min = 1, message = "API port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl ApiServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Location of the mounted credential and watcher tuning
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenFileConfig {
    /// File the credential is read from
    pub token_path: PathBuf,

    /// Directory registered with the watcher. Defaults to the parent of
    /// `token_path` so symlink-swap updates are observed.
    pub watch_dir: Option<PathBuf>,

    /// Quiet period collected into one batch (0 = reload on every batch)
    #[validate(range(max = 60000, message = "Debounce must be at most 60 seconds"))]
    pub debounce_ms: u64,

    /// Upper bound on waiting for the watcher thread at shutdown
    #[validate(range(min = 1, max = 60000, message = "Stop timeout must be 1ms..60s"))]
    pub stop_timeout_ms: u64,
}

impl Default for TokenFileConfig {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from("/etc/token/accessToken"),
            watch_dir: None,
            debounce_ms: 0,
            stop_timeout_ms: 2000,
        }
    }
}

impl TokenFileConfig {
    /// Directory to register with the watcher
    pub fn watch_dir(&self) -> PathBuf {
        match &self.watch_dir {
            Some(dir) => dir.clone(),
            None => self
                .token_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Which secret store backend receives published credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStoreKind {
    /// Kubernetes Secret via server-side apply
    Kubernetes,
    /// Process-local store, for development and tests
    Memory,
}

impl std::str::FromStr for SecretStoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(Error::config(format!(
                "Unknown secret store '{}', expected 'kubernetes' or 'memory'",
                other
            ))),
        }
    }
}

/// Credential publication settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PublisherConfig {
    /// Name of the shared Secret
    #[validate(length(min = 1, max = 253, message = "Secret name must be 1..253 characters"))]
    pub secret_name: String,

    /// Key inside the Secret's data map
    #[validate(length(min = 1, message = "Secret key cannot be empty"))]
    pub secret_key: String,

    /// Namespace override; `None` uses the replica's own namespace
    pub namespace: Option<String>,

    /// Server-side apply field manager
    #[validate(length(min = 1, message = "Field manager cannot be empty"))]
    pub field_manager: String,

    /// Secret store backend
    pub store: SecretStoreKind,

    /// Authentication endpoint; `None` uses the timestamp reference fetcher
    pub auth_url: Option<String>,

    /// Timeout for the authentication call
    #[validate(range(min = 1, max = 300, message = "Auth timeout must be 1..300 seconds"))]
    pub auth_timeout_secs: u64,

    /// Capacity of the publish work queue
    #[validate(range(min = 1, max = 1024, message = "Publish queue must be 1..1024"))]
    pub queue_capacity: usize,

    /// Attempts per promotion (1 = no retry)
    #[validate(range(min = 1, max = 100, message = "Max attempts must be 1..100"))]
    pub max_attempts: u32,

    /// First retry delay
    pub initial_backoff_ms: u64,

    /// Retry delay cap
    pub max_backoff_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            secret_name: "shared-access-token".to_string(),
            secret_key: "token".to_string(),
            namespace: None,
            field_manager: "keyholder".to_string(),
            store: SecretStoreKind::Kubernetes,
            auth_url: None,
            auth_timeout_secs: 10,
            queue_capacity: 4,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl PublisherConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Leadership provider settings.
///
/// Setting `lease_name` enables election through a Kubernetes `Lease`.
/// `assume_leader` is the static alternative for single-replica runs; the two
/// are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LeadershipConfig {
    /// Grant leadership at startup (static provider for single-replica runs)
    pub assume_leader: bool,

    /// Name of the `Lease` resource replicas compete for
    pub lease_name: Option<String>,

    /// Namespace of the lease; `None` uses the replica's own namespace
    pub lease_namespace: Option<String>,

    /// Holder identity written to the lease, usually the pod name
    pub lease_identity: Option<String>,

    /// How long a lock stays valid after its last renewal
    #[validate(range(min = 2, max = 3600, message = "Lease duration must be 2..3600 seconds"))]
    pub lease_duration_secs: u64,

    /// How long before expiry the holder renews
    #[validate(range(min = 1, message = "Lease grace must be at least 1 second"))]
    pub lease_grace_secs: u64,
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            assume_leader: false,
            lease_name: None,
            lease_namespace: None,
            lease_identity: None,
            lease_duration_secs: 30,
            lease_grace_secs: 5,
        }
    }
}

impl LeadershipConfig {
    pub fn lease_enabled(&self) -> bool {
        self.lease_name.is_some()
    }

    /// Time to wait for the lease to be released at shutdown
    pub fn lease_release_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_grace_secs)
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Tracing service name
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics server port
    #[validate(range(min = 1, message = "Metrics port must be between 1 and 65535"))]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "keyholder".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.enable_metrics {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        } else {
            None
        }
    }
}
