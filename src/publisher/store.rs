//! Cluster-visible secret stores with create-or-update semantics.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{Error, Result};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

/// A namespaced key-value secret store.
///
/// `apply` must converge: calling it twice with the same value succeeds both
/// times and leaves a single entry holding that value.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create or update secret `name` so that `key` maps to `encoded_value`.
    ///
    /// `namespace = None` means the caller's own namespace.
    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        encoded_value: &str,
    ) -> Result<ApplyOutcome>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Kubernetes Secret store using server-side apply.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: kube::Client,
    field_manager: String,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self { client, field_manager: field_manager.into() }
    }

    fn api(&self, namespace: Option<&str>) -> Api<Secret> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore")
            .field("namespace", &self.client.default_namespace())
            .field("field_manager", &self.field_manager)
            .finish()
    }
}

/// Apply patch for an Opaque secret. `data` carries the already-encoded text
/// verbatim, which is the wire form Kubernetes expects for that field.
fn secret_manifest(name: &str, key: &str, encoded_value: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "labels": { "app.kubernetes.io/managed-by": "keyholder" }
        },
        "type": "Opaque",
        "data": { key: encoded_value }
    })
}

/// A failed pre-read (for example a missing `get` permission) is reported as
/// an update.
fn outcome_from_lookup(name: &str, lookup: std::result::Result<bool, kube::Error>) -> ApplyOutcome {
    match lookup {
        Ok(false) => ApplyOutcome::Created,
        Ok(true) => ApplyOutcome::Updated,
        Err(e) => {
            debug!(secret = name, error = %e, "Could not read secret before apply, reporting it as updated");
            ApplyOutcome::Updated
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        encoded_value: &str,
    ) -> Result<ApplyOutcome> {
        let api = self.api(namespace);
        // Only labels the outcome; the apply below does not depend on it.
        let lookup = api.get_opt(name).await.map(|found| found.is_some());

        let manifest = secret_manifest(name, key, encoded_value);
        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(name, &params, &Patch::Apply(&manifest)).await?;

        let outcome = outcome_from_lookup(name, lookup);
        info!(
            secret = name,
            key,
            namespace = namespace.unwrap_or(self.client.default_namespace()),
            outcome = ?outcome,
            "Applied secret"
        );
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Identity of a stored secret
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

/// Calls recorded by [`InMemorySecretStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub creates: usize,
    pub updates: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.creates + self.updates
    }
}

#[derive(Debug, Default)]
struct InMemoryInner {
    secrets: HashMap<SecretRef, HashMap<String, String>>,
    calls: StoreCalls,
    fail_next: usize,
}

/// Process-local store that tracks creates versus updates.
///
/// Used when no cluster is available and to observe publication in tests.
#[derive(Debug)]
pub struct InMemorySecretStore {
    own_namespace: String,
    inner: Mutex<InMemoryInner>,
}

impl InMemorySecretStore {
    pub fn new(own_namespace: impl Into<String>) -> Self {
        Self { own_namespace: own_namespace.into(), inner: Mutex::new(InMemoryInner::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encoded value stored under `key`
    pub fn get(&self, namespace: Option<&str>, name: &str, key: &str) -> Option<String> {
        let secret = SecretRef {
            namespace: namespace.unwrap_or(&self.own_namespace).to_string(),
            name: name.to_string(),
        };
        self.lock().secrets.get(&secret).and_then(|data| data.get(key).cloned())
    }

    /// Number of distinct secrets held
    pub fn len(&self) -> usize {
        self.lock().secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock().calls.clone()
    }

    /// Make the next `count` applies fail
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new("default")
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn apply(
        &self,
        namespace: Option<&str>,
        name: &str,
        key: &str,
        encoded_value: &str,
    ) -> Result<ApplyOutcome> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(Error::secret_store(format!("injected failure applying secret '{}'", name)));
        }

        let secret = SecretRef {
            namespace: namespace.unwrap_or(&self.own_namespace).to_string(),
            name: name.to_string(),
        };
        let outcome = match inner.secrets.entry(secret.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(key.to_string(), encoded_value.to_string());
                inner.calls.updates += 1;
                ApplyOutcome::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(HashMap::from([(key.to_string(), encoded_value.to_string())]));
                inner.calls.creates += 1;
                ApplyOutcome::Created
            }
        };
        debug!(namespace = %secret.namespace, secret = name, outcome = ?outcome, "Applied in-memory secret");
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_twice_converges() {
        let store = InMemorySecretStore::new("team-a");

        let first = store.apply(None, "shared-access-token", "token", "YWJj").await.unwrap();
        let second = store.apply(None, "shared-access-token", "token", "YWJj").await.unwrap();

        assert_eq!(first, ApplyOutcome::Created);
        assert_eq!(second, ApplyOutcome::Updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.calls(), StoreCalls { creates: 1, updates: 1 });
        assert_eq!(store.get(Some("team-a"), "shared-access-token", "token").as_deref(), Some("YWJj"));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = InMemorySecretStore::new("team-a");
        store.apply(None, "shared", "token", "a").await.unwrap();
        store.apply(Some("team-b"), "shared", "token", "b").await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(None, "shared", "token").as_deref(), Some("a"));
        assert_eq!(store.get(Some("team-b"), "shared", "token").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemorySecretStore::default();
        store.fail_next(1);

        let err = store.apply(None, "shared", "token", "a").await.unwrap_err();
        assert!(matches!(err, Error::SecretStore(_)));
        assert!(store.is_empty());
        assert_eq!(store.calls().total(), 0);

        assert!(store.apply(None, "shared", "token", "a").await.is_ok());
    }

    #[test]
    fn test_failed_lookup_does_not_fail_apply_outcome() {
        assert_eq!(outcome_from_lookup("shared", Ok(false)), ApplyOutcome::Created);
        assert_eq!(outcome_from_lookup("shared", Ok(true)), ApplyOutcome::Updated);

        let forbidden = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"shared\" is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert_eq!(outcome_from_lookup("shared", Err(forbidden)), ApplyOutcome::Updated);
    }

    #[test]
    fn test_secret_manifest_shape() {
        let manifest = secret_manifest("shared-access-token", "token", "ZmFrZQ==");
        assert_eq!(manifest["kind"], "Secret");
        assert_eq!(manifest["type"], "Opaque");
        assert_eq!(manifest["metadata"]["name"], "shared-access-token");
        assert_eq!(manifest["data"]["token"], "ZmFrZQ==");
    }
}
