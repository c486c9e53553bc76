//! Leader election through a Kubernetes `Lease`.
//!
//! [`LeaseElection::start`] builds a `kube-lease-manager` [`LeaseManager`]
//! and runs it in watch mode. The manager keeps trying to take or renew the
//! lease and reports this replica's lock state on a `watch` channel, which
//! [`crate::sidecar::Sidecar::attach_lease`] feeds into the leadership state.
//! Dropping the receiver makes the manager release the lease and exit.

use kube_lease_manager::{LeaseManager, LeaseManagerBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::LeadershipConfig;
use crate::errors::{Error, Result};

type ManagerTask = JoinHandle<kube_lease_manager::Result<LeaseManager>>;

/// A running lease manager and the channel it reports on
#[derive(Debug)]
pub struct LeaseElection {
    lease_name: String,
    namespace: String,
    rx: watch::Receiver<bool>,
    task: ManagerTask,
}

impl LeaseElection {
    /// Join the election for `config.lease_name`.
    ///
    /// The lease is created if it does not exist yet.
    pub async fn start(client: kube::Client, config: &LeadershipConfig) -> Result<Self> {
        let lease_name = config
            .lease_name
            .clone()
            .ok_or_else(|| Error::config("Lease election requires KEYHOLDER_LEASE_NAME"))?;
        let namespace = lease_namespace(config, client.default_namespace());

        let mut builder = LeaseManagerBuilder::new(client, lease_name.as_str())
            .with_namespace(namespace.as_str())
            .with_duration(config.lease_duration_secs)
            .with_grace(config.lease_grace_secs);
        if let Some(identity) = &config.lease_identity {
            builder = builder.with_identity(identity.as_str());
        }

        let manager = builder.build().await?;
        let (rx, task) = manager.watch().await;

        info!(
            lease = %lease_name,
            namespace = %namespace,
            identity = config.lease_identity.as_deref().unwrap_or("generated"),
            duration_secs = config.lease_duration_secs,
            "Joined lease election"
        );
        Ok(Self { lease_name, namespace, rx, task })
    }

    pub fn lease_name(&self) -> &str {
        &self.lease_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[cfg(test)]
    pub(crate) fn from_parts(lease_name: &str, rx: watch::Receiver<bool>, task: ManagerTask) -> Self {
        Self { lease_name: lease_name.to_string(), namespace: "default".to_string(), rx, task }
    }

    pub(crate) fn into_parts(self) -> (watch::Receiver<bool>, LeaseTask) {
        (self.rx, LeaseTask { lease_name: self.lease_name, task: self.task })
    }
}

/// Background lease manager, kept so shutdown can wait for the release
#[derive(Debug)]
pub(crate) struct LeaseTask {
    lease_name: String,
    task: ManagerTask,
}

impl LeaseTask {
    /// Wait for the manager to release the lease. Only meaningful once every
    /// receiver of its channel has been dropped.
    pub(crate) async fn released(self) -> Result<()> {
        match self.task.await {
            Ok(Ok(_)) => {
                info!(lease = %self.lease_name, "Released leadership lease");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(Error::election(format!("Lease manager task failed: {}", e))),
        }
    }
}

fn lease_namespace(config: &LeadershipConfig, own_namespace: &str) -> String {
    config.lease_namespace.clone().unwrap_or_else(|| own_namespace.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_namespace_defaults_to_own() {
        let config = LeadershipConfig { lease_name: Some("keyholder".to_string()), ..Default::default() };
        assert_eq!(lease_namespace(&config, "payments"), "payments");

        let config = LeadershipConfig { lease_namespace: Some("coordination".to_string()), ..config };
        assert_eq!(lease_namespace(&config, "payments"), "coordination");
    }

    #[tokio::test]
    async fn test_released_maps_manager_errors() {
        let task = LeaseTask {
            lease_name: "keyholder".to_string(),
            task: tokio::spawn(async {
                Err(kube_lease_manager::LeaseManagerError::NonexistentLease("keyholder".to_string()))
            }),
        };
        assert!(matches!(task.released().await, Err(Error::Election(_))));
    }
}
