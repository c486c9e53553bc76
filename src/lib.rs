//! # Keyholder
//!
//! Keyholder is a sidecar that runs next to every replica of a clustered
//! service. One replica at a time is granted leadership by an external
//! leader-election provider; that replica mints a fresh shared credential and
//! publishes it into a cluster secret store. Every replica keeps a
//! hot-reloaded copy of the credential from its mounted file and reports
//! readiness based on whether it holds one.
//!
//! ## Architecture
//!
//! ```text
//! election provider ─▶ LeadershipState ─▶ publish queue ─▶ CredentialPublisher ─▶ secret store
//!
//! file notifications ─▶ SecretSource ─▶ SecretCache ─▶ ReadinessReporter / HTTP API
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use keyholder::{sidecar::{build_fetcher, build_store, Sidecar}, Config, LeadershipListener, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_env()?;
//!     let fetcher = build_fetcher(&config.publisher)?;
//!     let store = build_store(&config.publisher).await?;
//!     let sidecar = Sidecar::start(&config, fetcher, store)?;
//!
//!     sidecar.listener().granted();
//!     sidecar.shutdown().await
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod credential;
pub mod errors;
pub mod leadership;
pub mod observability;
pub mod publisher;
pub mod sidecar;
pub mod watcher;

// Re-export commonly used types and traits
pub use cache::SecretCache;
pub use config::Config;
pub use credential::Credential;
pub use errors::{Error, Result};
pub use leadership::{LeadershipListener, LeadershipState, LeaseElection};
pub use observability::{HealthCheck, ReadinessReporter};
pub use sidecar::Sidecar;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
