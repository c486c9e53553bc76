//! # Health Checking
//!
//! Readiness and liveness for the sidecar.
//!
//! - Readiness is a pure function of the secret cache: ready exactly when a
//!   credential is present (an empty credential counts as present).
//! - Liveness is lost once the file watcher loop has died, so the
//!   orchestrator can restart the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::SecretCache;

/// Health status for a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Component is healthy and operational
    Healthy,
    /// Component is unhealthy and not functional
    Unhealthy { message: String },
}

impl HealthStatus {
    /// Check if the status is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Get the status message
    pub fn message(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Unhealthy { message } => Some(message),
        }
    }

    /// Actuator-style label
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "UP",
            HealthStatus::Unhealthy { .. } => "DOWN",
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Component name
    pub component: String,
    /// Health status
    pub status: HealthStatus,
    /// Last check timestamp
    pub last_check: chrono::DateTime<chrono::Utc>,
    /// Additional details
    pub details: HashMap<String, String>,
}

impl HealthCheck {
    /// Create a new health check result
    pub fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            last_check: chrono::Utc::now(),
            details: HashMap::new(),
        }
    }

    /// Create a healthy health check
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    /// Create an unhealthy health check
    pub fn unhealthy<S: Into<String>>(component: impl Into<String>, message: S) -> Self {
        Self::new(component, HealthStatus::Unhealthy { message: message.into() })
    }

    /// Add a detail entry
    pub fn with_detail<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Readiness derived from the secret cache. Holds no state of its own.
#[derive(Debug, Clone)]
pub struct ReadinessReporter {
    cache: Arc<SecretCache>,
}

impl ReadinessReporter {
    pub fn new(cache: Arc<SecretCache>) -> Self {
        Self { cache }
    }

    /// True exactly when the cache holds a credential
    pub fn is_ready(&self) -> bool {
        self.cache.is_present()
    }

    /// Readiness as a health check with a `token` detail
    pub fn check(&self) -> HealthCheck {
        if self.is_ready() {
            HealthCheck::healthy("token").with_detail("token", "available")
        } else {
            HealthCheck::unhealthy("token", "token not loaded").with_detail("token", "not available")
        }
    }
}

/// Liveness flag shared with the file watcher.
///
/// Starts alive; [`LivenessProbe::mark_dead`] is sticky.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    alive: Arc<AtomicBool>,
    reason: Arc<std::sync::Mutex<Option<String>>>,
}

impl LivenessProbe {
    pub fn new() -> Self {
        Self { alive: Arc::new(AtomicBool::new(true)), reason: Arc::new(std::sync::Mutex::new(None)) }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Record a fatal failure
    pub fn mark_dead(&self, reason: impl Into<String>) {
        let mut guard = self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(reason.into());
        }
        self.alive.store(false, Ordering::Release);
    }

    pub fn check(&self) -> HealthCheck {
        if self.is_alive() {
            HealthCheck::healthy("watcher").with_detail("watcher", "running")
        } else {
            let reason = self
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
                .unwrap_or_else(|| "watcher stopped".to_string());
            HealthCheck::unhealthy("watcher", reason).with_detail("watcher", "failed")
        }
    }
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self::new()
    }
}
