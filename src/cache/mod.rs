//! Hot-reloadable in-memory copy of the mounted credential.
//!
//! The cache owns a single immutable [`CachedSecretState`] snapshot behind an
//! `Arc`. A reload builds a complete new snapshot and swaps the `Arc` under a
//! short write lock, so readers only ever see a fully-formed state.
//!
//! Once a value has been loaded it is never cleared: a failed reload keeps the
//! previous value and only records the failure.
//!
//! # Example
//!
//! ```rust,ignore
//! let cache = SecretCache::new("/etc/token/accessToken");
//! cache.reload().ok();            // initial load, failure is tolerated
//! if let Some(token) = cache.get() {
//!     use_token(token.expose());
//! }
//! ```

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

use crate::credential::Credential;
use crate::errors::{Error, Result};
use crate::observability::metrics::MetricsRecorder;

/// Result of the most recent reload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No reload has been attempted yet
    Pending,
    Success,
    Failure { message: String },
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReloadOutcome::Success)
    }
}

/// Immutable snapshot of the cache
#[derive(Debug, Clone)]
pub struct CachedSecretState {
    /// Last successfully loaded value
    pub value: Option<Credential>,
    /// Outcome of the latest reload
    pub last_outcome: ReloadOutcome,
    /// When `value` was last replaced
    pub last_success_at: Option<DateTime<Utc>>,
    /// Number of reload attempts so far
    pub reload_count: u64,
}

impl CachedSecretState {
    fn empty() -> Self {
        Self { value: None, last_outcome: ReloadOutcome::Pending, last_success_at: None, reload_count: 0 }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// In-memory credential cache fed from a file.
///
/// Safe to share across threads; `get` never blocks on I/O and `reload` may
/// run concurrently with readers and with other reloads (last write wins).
#[derive(Debug)]
pub struct SecretCache {
    path: PathBuf,
    state: RwLock<Arc<CachedSecretState>>,
    metrics: MetricsRecorder,
}

impl SecretCache {
    /// Creates an empty cache reading from `path`. No I/O happens here.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(Arc::new(CachedSecretState::empty())),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Source file of the credential
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current credential, or `None` before the first successful load.
    pub fn get(&self) -> Option<Credential> {
        self.snapshot().value.clone()
    }

    /// Whether a credential is currently held
    pub fn is_present(&self) -> bool {
        self.snapshot().is_present()
    }

    /// Full snapshot of the cached state
    pub fn snapshot(&self) -> Arc<CachedSecretState> {
        let guard = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Re-reads the credential file and swaps in the new value.
    ///
    /// On failure the previous value is retained, the failure is recorded in
    /// the snapshot and logged, and the error is returned to the caller.
    pub fn reload(&self) -> Result<()> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let credential = Credential::from_bytes(&bytes);
                let mut unchanged = false;
                self.swap(|current| {
                    unchanged = current.value.as_ref() == Some(&credential);
                    CachedSecretState {
                        value: Some(credential),
                        last_outcome: ReloadOutcome::Success,
                        last_success_at: Some(Utc::now()),
                        reload_count: current.reload_count + 1,
                    }
                });
                self.metrics.record_reload(true);
                if unchanged {
                    debug!(path = %self.path.display(), "Secret token reloaded, content unchanged");
                } else {
                    info!(path = %self.path.display(), "Secret token was reloaded successfully");
                }
                Ok(())
            }
            Err(source) => {
                let message = source.to_string();
                self.swap(|current| CachedSecretState {
                    value: current.value.clone(),
                    last_outcome: ReloadOutcome::Failure { message: message.clone() },
                    last_success_at: current.last_success_at,
                    reload_count: current.reload_count + 1,
                });
                self.metrics.record_reload(false);
                error!(
                    path = %self.path.display(),
                    error = %message,
                    retained = self.is_present(),
                    "Failed to reload secret token"
                );
                Err(Error::io(format!("reading {}", self.path.display()), source))
            }
        }
    }

    /// Builds the next snapshot from the current one under the write lock and
    /// publishes it in one assignment.
    fn swap<F>(&self, next: F)
    where
        F: FnOnce(&CachedSecretState) -> CachedSecretState,
    {
        let mut guard = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = next(&guard);
        *guard = Arc::new(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn setup() -> (TempDir, SecretCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SecretCache::new(dir.path().join("accessToken"));
        (dir, cache)
    }

    #[test]
    fn test_absent_before_first_load() {
        let (_dir, cache) = setup();
        assert!(cache.get().is_none());
        assert!(!cache.is_present());
        assert_eq!(cache.snapshot().last_outcome, ReloadOutcome::Pending);
    }

    #[test]
    fn test_missing_file_keeps_cache_absent() {
        let (_dir, cache) = setup();
        assert!(cache.reload().is_err());
        assert!(cache.get().is_none());
        assert!(matches!(cache.snapshot().last_outcome, ReloadOutcome::Failure { .. }));
    }

    #[test]
    fn test_reload_loads_value() {
        let (dir, cache) = setup();
        fs::write(dir.path().join("accessToken"), "abc").unwrap();

        cache.reload().unwrap();
        assert_eq!(cache.get().unwrap().expose(), "abc");
        let snapshot = cache.snapshot();
        assert!(snapshot.last_outcome.is_success());
        assert!(snapshot.last_success_at.is_some());
        assert_eq!(snapshot.reload_count, 1);
    }

    #[traced_test]
    #[test]
    fn test_value_retained_after_failed_reload() {
        let (dir, cache) = setup();
        let path = dir.path().join("accessToken");
        fs::write(&path, "abc").unwrap();
        cache.reload().unwrap();

        fs::remove_file(&path).unwrap();
        assert!(cache.reload().is_err());

        assert_eq!(cache.get().unwrap().expose(), "abc");
        assert!(!cache.snapshot().last_outcome.is_success());
        assert!(logs_contain("Failed to reload secret token"));
    }

    #[test]
    fn test_duplicate_reloads_are_idempotent() {
        let (dir, cache) = setup();
        fs::write(dir.path().join("accessToken"), "abc").unwrap();

        cache.reload().unwrap();
        let once = cache.get();
        for _ in 0..5 {
            cache.reload().unwrap();
        }
        assert_eq!(cache.get(), once);
        assert_eq!(cache.snapshot().reload_count, 6);
    }

    #[test]
    fn test_empty_file_is_a_present_value() {
        let (dir, cache) = setup();
        fs::write(dir.path().join("accessToken"), "").unwrap();

        cache.reload().unwrap();
        assert!(cache.is_present());
        assert_eq!(cache.get().unwrap().expose(), "");
    }

    #[test]
    fn test_concurrent_reloads_and_reads_never_tear() {
        let (dir, cache) = setup();
        let path = dir.path().join("accessToken");
        fs::write(&path, "value-a").unwrap();
        cache.reload().unwrap();

        let cache = Arc::new(cache);
        let mut handles = Vec::new();
        for i in 0..4 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        let _ = cache.reload();
                    } else {
                        let value = cache.get().expect("value never regresses to absent");
                        assert_eq!(value.expose(), "value-a");
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get().unwrap().expose(), "value-a");
    }
}
