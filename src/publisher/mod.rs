//! # Credential Publication
//!
//! On every promotion to leader, a fresh credential is fetched, base64
//! encoded and upserted into the cluster secret store so that the other
//! replicas can consume it.
//!
//! Publication runs on a dedicated worker fed by the bounded queue that
//! [`LeadershipState`](crate::leadership::LeadershipState) enqueues into.
//! Failures are logged and retried under a [`RetryPolicy`]; they never touch
//! the leadership flag.

pub mod fetcher;
pub mod retry;
pub mod store;
pub mod worker;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::debug;

use crate::config::PublisherConfig;
use crate::credential::Credential;
use crate::errors::{Error, Result};

pub use fetcher::{HttpTokenFetcher, TimestampTokenFetcher, TokenFetcher};
pub use retry::RetryPolicy;
pub use store::{ApplyOutcome, InMemorySecretStore, KubeSecretStore, SecretStore, StoreCalls};
pub use worker::{
    spawn_publish_worker, PublishOutcome, PublishStatus, PublishWorkerHandle, SkippedPublish,
};

/// Encode a credential as standard base64 text
pub fn encode_credential(credential: &Credential) -> String {
    STANDARD.encode(credential.as_bytes())
}

/// Decode text produced by [`encode_credential`]
pub fn decode_credential(encoded: &str) -> Result<Credential> {
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| Error::encoding(format!("Invalid base64 credential: {}", e)))?;
    Ok(Credential::from_bytes(&bytes))
}

/// Fetch, encode and upsert one credential
pub struct CredentialPublisher {
    fetcher: Arc<dyn TokenFetcher>,
    store: Arc<dyn SecretStore>,
    namespace: Option<String>,
    secret_name: String,
    secret_key: String,
}

impl CredentialPublisher {
    pub fn new(
        fetcher: Arc<dyn TokenFetcher>,
        store: Arc<dyn SecretStore>,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            namespace: config.namespace.clone(),
            secret_name: config.secret_name.clone(),
            secret_key: config.secret_key.clone(),
        }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    /// Mint a new credential and publish it. Each step can fail on its own;
    /// the first failure is returned.
    pub async fn publish_on_promotion(&self) -> Result<ApplyOutcome> {
        let credential = self.fetcher.fetch().await?;
        let encoded = encode_credential(&credential);
        debug!(
            fetcher = self.fetcher.name(),
            store = self.store.name(),
            encoded_len = encoded.len(),
            "Publishing credential"
        );

        self.store
            .apply(self.namespace.as_deref(), &self.secret_name, &self.secret_key, &encoded)
            .await
    }
}

impl std::fmt::Debug for CredentialPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPublisher")
            .field("fetcher", &self.fetcher.name())
            .field("store", &self.store.name())
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .field("secret_key", &self.secret_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingFetcher;

    #[async_trait]
    impl TokenFetcher for FailingFetcher {
        async fn fetch(&self) -> Result<Credential> {
            Err(Error::token_fetch("auth service unavailable"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_encode_credential() {
        assert_eq!(encode_credential(&Credential::new("abc")), "YWJj");
        assert_eq!(encode_credential(&Credential::new("")), "");
        let decoded = decode_credential(&encode_credential(&Credential::new("fake-token-1"))).unwrap();
        assert_eq!(decoded.expose(), "fake-token-1");
    }

    #[test]
    fn test_decode_rejects_invalid_text() {
        assert!(matches!(decode_credential("not base64!"), Err(Error::Encoding(_))));
    }

    #[tokio::test]
    async fn test_publish_writes_encoded_token() {
        let store = Arc::new(InMemorySecretStore::new("team-a"));
        let publisher = CredentialPublisher::new(
            Arc::new(TimestampTokenFetcher::new()),
            store.clone(),
            &PublisherConfig::default(),
        );

        let outcome = publisher.publish_on_promotion().await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        let encoded = store.get(None, "shared-access-token", "token").unwrap();
        let decoded = decode_credential(&encoded).unwrap();
        assert!(decoded.expose().starts_with("fake-token-"));
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_store() {
        let store = Arc::new(InMemorySecretStore::default());
        let publisher =
            CredentialPublisher::new(Arc::new(FailingFetcher), store.clone(), &PublisherConfig::default());

        let err = publisher.publish_on_promotion().await.unwrap_err();
        assert!(matches!(err, Error::TokenFetch(_)));
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_uses_configured_namespace() {
        let store = Arc::new(InMemorySecretStore::new("own"));
        let config = PublisherConfig { namespace: Some("shared".to_string()), ..Default::default() };
        let publisher = CredentialPublisher::new(Arc::new(TimestampTokenFetcher::new()), store.clone(), &config);

        publisher.publish_on_promotion().await.unwrap();
        assert!(store.get(Some("shared"), "shared-access-token", "token").is_some());
        assert!(store.get(None, "shared-access-token", "token").is_none());
    }
}
