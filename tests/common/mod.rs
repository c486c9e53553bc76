//! Shared helpers for keyholder integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use keyholder::config::{Config, SecretStoreKind};
use tempfile::TempDir;

/// A temporary token directory standing in for the mounted secret volume
pub struct TokenDir {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TokenDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp token dir");
        let path = dir.path().join("token");
        Self { dir, path }
    }

    pub fn write(&self, value: &str) {
        std::fs::write(&self.path, value).expect("write token file");
    }

    pub fn remove(&self) {
        std::fs::remove_file(&self.path).expect("remove token file");
    }
}

/// Configuration wired to `token_dir`, the in-memory store and fast retries
pub fn test_config(token_dir: &TokenDir) -> Config {
    let mut config = Config::default();
    config.token_file.token_path = token_dir.path.clone();
    config.token_file.stop_timeout_ms = 2_000;
    config.publisher.store = SecretStoreKind::Memory;
    config.publisher.max_attempts = 1;
    config.publisher.initial_backoff_ms = 10;
    config.publisher.max_backoff_ms = 50;
    config
}

/// Poll `condition` on a blocking thread
pub fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Poll `condition` from async code
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
