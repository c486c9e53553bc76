//! Sources of fresh credentials.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::credential::Credential;
use crate::errors::{Error, Result};

/// Obtains a fresh credential from an authentication collaborator.
///
/// # Security Considerations
///
/// - Implementations MUST NOT log the returned value
/// - A failure is returned, never retried internally; retry is the
///   publisher's policy
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Fetch a new credential
    async fn fetch(&self) -> Result<Credential>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Mints `fake-token-<epoch millis>` without any network call.
#[derive(Debug, Clone, Default)]
pub struct TimestampTokenFetcher;

impl TimestampTokenFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenFetcher for TimestampTokenFetcher {
    async fn fetch(&self) -> Result<Credential> {
        Ok(Credential::new(format!("fake-token-{}", Utc::now().timestamp_millis())))
    }

    fn name(&self) -> &'static str {
        "timestamp"
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Fetches a credential with `POST <url>`, expecting `{"access_token": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpTokenFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::token_fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self) -> Result<Credential> {
        let response = self.client.post(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::token_fetch(format!(
                "Authentication service returned {} for {}",
                status, self.url
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            Error::token_fetch(format!("Invalid token response from {}: {}", self.url, e))
        })?;

        debug!(url = %self.url, token_len = body.access_token.len(), "Fetched credential");
        Ok(Credential::new(body.access_token))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
