//! # Metrics Collection
//!
//! Provides Prometheus metrics for leadership, publication and reload
//! activity. Recording is a no-op until [`init_metrics`] installs an exporter.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_gauge, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks sidecar activity
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a leadership notification and the resulting flag value
    pub fn record_leadership(&self, is_leader: bool, transitioned: bool) {
        let event = if is_leader { "granted" } else { "revoked" };
        let transitioned = if transitioned { "true" } else { "false" };
        counter!(
            "keyholder_leadership_events_total",
            "event" => event,
            "transitioned" => transitioned
        )
        .increment(1);
        gauge!("keyholder_is_leader").set(if is_leader { 1.0 } else { 0.0 });
    }

    /// Record one publish attempt
    pub fn record_publish_attempt(&self, success: bool, duration: f64) {
        let status = if success { "success" } else { "error" };
        counter!("keyholder_publish_attempts_total", "status" => status).increment(1);
        histogram!("keyholder_publish_duration_seconds").record(duration);
    }

    /// Record a publish request that was dropped before any attempt
    pub fn record_publish_skipped(&self, reason: &'static str) {
        counter!("keyholder_publish_skipped_total", "reason" => reason).increment(1);
    }

    /// Record a cache reload
    pub fn record_reload(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!("keyholder_reloads_total", "status" => status).increment(1);
    }

    /// Record a notification batch handled by the watcher
    pub fn record_watch_batch(&self, events: usize) {
        counter!("keyholder_watch_batches_total").increment(1);
        histogram!("keyholder_watch_batch_events").record(events as f64);
    }

    /// Update the watcher liveness gauge
    pub fn set_watcher_alive(&self, alive: bool) {
        gauge!("keyholder_watcher_alive").set(if alive { 1.0 } else { 0.0 });
    }

    fn register(&self) {
        describe_counter!(
            "keyholder_leadership_events_total",
            Unit::Count,
            "Leadership notifications received from the election provider"
        );
        describe_gauge!("keyholder_is_leader", "1 when this replica holds leadership");
        describe_counter!(
            "keyholder_publish_attempts_total",
            Unit::Count,
            "Credential publish attempts by outcome"
        );
        describe_counter!(
            "keyholder_publish_skipped_total",
            Unit::Count,
            "Publish requests skipped because leadership was lost or superseded"
        );
        describe_counter!("keyholder_reloads_total", Unit::Count, "Cache reloads by outcome");
        describe_counter!(
            "keyholder_watch_batches_total",
            Unit::Count,
            "File notification batches processed"
        );
        describe_gauge!("keyholder_watcher_alive", "1 while the file watcher loop is running");
    }
}

/// Install the Prometheus exporter when metrics are enabled
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    MetricsRecorder::new().register();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}
