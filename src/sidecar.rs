//! Wiring and lifecycle for the sidecar components.
//!
//! [`Sidecar::start`] builds the cache, starts the file watcher, creates the
//! leadership state and spawns the publish worker. [`Sidecar::shutdown`]
//! tears them down again; the watcher stop is bounded by its configured
//! timeout so an unresponsive notification primitive cannot hang shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::ApiState;
use crate::cache::SecretCache;
use crate::config::{Config, LeadershipConfig, PublisherConfig, SecretStoreKind};
use crate::errors::{Error, Result};
use crate::leadership::{
    spawn_watch_bridge, LeadershipListener, LeadershipState, LeaseElection, LeaseTask,
};
use crate::observability::health::{LivenessProbe, ReadinessReporter};
use crate::publisher::{
    spawn_publish_worker, CredentialPublisher, HttpTokenFetcher, InMemorySecretStore,
    KubeSecretStore, PublishStatus, PublishWorkerHandle, RetryPolicy, SecretStore,
    TimestampTokenFetcher, TokenFetcher,
};
use crate::watcher::{SecretSource, WatchHandle, WatchOptions};

/// Token fetcher selected by configuration: HTTP when an auth URL is set,
/// otherwise the timestamp reference fetcher.
pub fn build_fetcher(config: &PublisherConfig) -> Result<Arc<dyn TokenFetcher>> {
    match &config.auth_url {
        Some(url) => Ok(Arc::new(HttpTokenFetcher::new(url.clone(), config.auth_timeout())?)),
        None => Ok(Arc::new(TimestampTokenFetcher::new())),
    }
}

/// Secret store selected by configuration
pub async fn build_store(config: &PublisherConfig) -> Result<Arc<dyn SecretStore>> {
    match config.store {
        SecretStoreKind::Kubernetes => {
            let client = kube_client()
                .await
                .map_err(|e| Error::secret_store(format!("Failed to create Kubernetes client: {}", e)))?;
            Ok(Arc::new(KubeSecretStore::new(client, config.field_manager.clone())))
        }
        SecretStoreKind::Memory => {
            let namespace = config.namespace.clone().unwrap_or_else(|| "default".to_string());
            warn!(namespace = %namespace, "Using in-memory secret store, credentials stay in this process");
            Ok(Arc::new(InMemorySecretStore::new(namespace)))
        }
    }
}

/// Lease election selected by configuration; `None` when no lease is configured
pub async fn build_election(config: &LeadershipConfig) -> Result<Option<LeaseElection>> {
    if !config.lease_enabled() {
        if !config.assume_leader {
            warn!("No leadership provider configured, this replica will never publish a credential");
        }
        return Ok(None);
    }
    let client = kube_client()
        .await
        .map_err(|e| Error::election(format!("Failed to create Kubernetes client: {}", e)))?;
    Ok(Some(LeaseElection::start(client, config).await?))
}

async fn kube_client() -> std::result::Result<kube::Client, kube::Error> {
    let client = kube::Client::try_default().await?;
    info!(namespace = client.default_namespace(), "Connected to Kubernetes");
    Ok(client)
}

/// Running set of sidecar components
pub struct Sidecar {
    leadership: Arc<LeadershipState>,
    cache: Arc<SecretCache>,
    liveness: LivenessProbe,
    watcher: Option<WatchHandle>,
    publish_worker: PublishWorkerHandle,
    bridges: Vec<JoinHandle<()>>,
    lease: Option<LeaseTask>,
    lease_release_timeout: Duration,
    cancel: CancellationToken,
}

impl Sidecar {
    /// Start all components. Must be called inside a Tokio runtime.
    pub fn start(
        config: &Config,
        fetcher: Arc<dyn TokenFetcher>,
        store: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        let cache = Arc::new(SecretCache::new(config.token_file.token_path.clone()));
        let liveness = LivenessProbe::new();

        let watcher = SecretSource::new(
            Arc::clone(&cache),
            config.token_file.watch_dir(),
            WatchOptions::from_config(&config.token_file),
        )
        .with_liveness(liveness.clone())
        .start()?;

        let (publish_tx, publish_rx) = mpsc::channel(config.publisher.queue_capacity.max(1));
        let leadership = Arc::new(LeadershipState::new(publish_tx));
        let publisher = Arc::new(CredentialPublisher::new(fetcher, store, &config.publisher));

        let cancel = CancellationToken::new();
        let publish_worker = spawn_publish_worker(
            publisher,
            Arc::clone(&leadership),
            publish_rx,
            RetryPolicy::from_config(&config.publisher),
            cancel.child_token(),
        );

        if config.leadership.assume_leader {
            info!("Static leadership configured, granting leadership to this replica");
            leadership.on_granted();
        }

        info!(
            token_path = %config.token_file.token_path.display(),
            ready = cache.is_present(),
            "Sidecar started"
        );

        Ok(Self {
            leadership,
            cache,
            liveness,
            watcher: Some(watcher),
            publish_worker,
            bridges: Vec::new(),
            lease: None,
            lease_release_timeout: config.leadership.lease_release_timeout(),
            cancel,
        })
    }

    pub fn leadership(&self) -> Arc<LeadershipState> {
        Arc::clone(&self.leadership)
    }

    /// Listener to hand to an external leader-election provider
    pub fn listener(&self) -> Arc<dyn LeadershipListener> {
        self.leadership()
    }

    pub fn cache(&self) -> Arc<SecretCache> {
        Arc::clone(&self.cache)
    }

    pub fn readiness(&self) -> ReadinessReporter {
        ReadinessReporter::new(self.cache())
    }

    pub fn liveness(&self) -> LivenessProbe {
        self.liveness.clone()
    }

    pub fn publish_status(&self) -> PublishStatus {
        self.publish_worker.status()
    }

    pub fn api_state(&self) -> ApiState {
        ApiState::new(self.leadership(), self.cache(), self.liveness())
    }

    /// Follow a provider that reports its lock state on a `watch` channel.
    ///
    /// The channel's current value is applied immediately, so attaching a
    /// provider that reports `false` revokes a static `assume_leader` grant.
    pub fn attach_provider(&mut self, rx: watch::Receiver<bool>) {
        let bridge = spawn_watch_bridge(rx, self.listener(), self.cancel.child_token());
        self.bridges.push(bridge);
    }

    /// Follow a Kubernetes lease election. The lease is released on shutdown.
    pub fn attach_lease(&mut self, election: LeaseElection) {
        info!(lease = election.lease_name(), namespace = election.namespace(), "Following lease election");
        let (rx, task) = election.into_parts();
        self.attach_provider(rx);
        self.lease = Some(task);
    }

    /// Stop the bridges, the publish worker and the file watcher
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Shutting down sidecar");
        self.cancel.cancel();
        self.publish_worker.shutdown();

        for bridge in self.bridges.drain(..) {
            let _ = bridge.await;
        }
        self.publish_worker.join().await;

        // The bridges held the only receivers, so the manager is now releasing the lease.
        if let Some(lease) = self.lease.take() {
            match tokio::time::timeout(self.lease_release_timeout, lease.released()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to release leadership lease"),
                Err(_) => warn!(
                    timeout_secs = self.lease_release_timeout.as_secs(),
                    "Lease was not released in time, it will expire on its own"
                ),
            }
        }

        if let Some(mut watcher) = self.watcher.take() {
            let stopped = tokio::task::spawn_blocking(move || watcher.stop())
                .await
                .map_err(|e| Error::shutdown(format!("Secret watcher stop task failed: {}", e)))?;
            if !stopped {
                warn!("Secret watcher was detached during shutdown");
            }
        }

        info!("Sidecar stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Sidecar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sidecar")
            .field("is_leader", &self.leadership.is_leader())
            .field("ready", &self.cache.is_present())
            .field("alive", &self.liveness.is_alive())
            .finish()
    }
}
