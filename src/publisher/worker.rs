//! Background worker draining the publish queue.
//!
//! One task consumes [`PublishRequest`]s in FIFO order. A dequeued request
//! publishes for the *current* promotion term, so requests that piled up
//! across grant/revoke/grant sequences collapse into one publish for the
//! newest term. Before every attempt the worker re-checks that the replica is
//! still leader within that term.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::{ApplyOutcome, CredentialPublisher, RetryPolicy};
use crate::leadership::{LeadershipState, PublishRequest};
use crate::observability::metrics::MetricsRecorder;

/// Outcome of the most recent publish request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing has been published yet
    Idle,
    Published(ApplyOutcome),
    Failed { message: String },
}

/// A publish request that was dropped without (finishing) publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedPublish {
    pub term: u64,
    /// `revoked` or `superseded`
    pub reason: &'static str,
}

/// Diagnostics about credential publication.
///
/// `last_term`, `last_outcome` and `attempts` describe the last term a
/// publish was attempted for. Skips are tracked separately.
#[derive(Debug, Clone)]
pub struct PublishStatus {
    pub last_term: u64,
    pub last_outcome: PublishOutcome,
    /// Attempts spent on the last handled term
    pub attempts: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_skip: Option<SkippedPublish>,
}

impl Default for PublishStatus {
    fn default() -> Self {
        Self {
            last_term: 0,
            last_outcome: PublishOutcome::Idle,
            attempts: 0,
            last_success_at: None,
            last_skip: None,
        }
    }
}

/// Handle for controlling a running publish worker
pub struct PublishWorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: Arc<RwLock<PublishStatus>>,
}

impl PublishWorkerHandle {
    /// Stop the worker, abandoning any in-flight attempt or backoff
    pub fn shutdown(&self) {
        info!("Initiating shutdown of credential publish worker");
        self.cancel.cancel();
    }

    /// Wait for the worker task to finish
    pub async fn join(self) {
        let _ = self.handle.await;
    }

    pub fn status(&self) -> PublishStatus {
        self.status.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

struct PublishWorker {
    publisher: Arc<CredentialPublisher>,
    leadership: Arc<LeadershipState>,
    policy: RetryPolicy,
    status: Arc<RwLock<PublishStatus>>,
    cancel: CancellationToken,
    metrics: MetricsRecorder,
    last_handled_term: u64,
}

/// Spawn the worker consuming `rx`. It stops when `cancel` fires or every
/// sender is dropped.
pub fn spawn_publish_worker(
    publisher: Arc<CredentialPublisher>,
    leadership: Arc<LeadershipState>,
    rx: mpsc::Receiver<PublishRequest>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> PublishWorkerHandle {
    let status = Arc::new(RwLock::new(PublishStatus::default()));
    let worker = PublishWorker {
        publisher,
        leadership,
        policy,
        status: Arc::clone(&status),
        cancel: cancel.clone(),
        metrics: MetricsRecorder::new(),
        last_handled_term: 0,
    };

    let handle = tokio::spawn(worker.run(rx));
    PublishWorkerHandle { cancel, handle, status }
}

impl PublishWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<PublishRequest>) {
        info!(max_attempts = self.policy.max_attempts, "Credential publish worker started");
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = self.handle(request) => {}
                        }
                    }
                    None => break,
                },
            }
        }

        info!("Credential publish worker stopped");
    }

    async fn handle(&mut self, request: PublishRequest) {
        let snapshot = self.leadership.snapshot();
        if !snapshot.is_leader {
            self.skip(request.term, "revoked");
            return;
        }
        if snapshot.term <= self.last_handled_term {
            self.skip(request.term, "superseded");
            return;
        }

        let term = snapshot.term;
        self.last_handled_term = term;
        self.publish(term).instrument(crate::publish_span!(term, requested_term = request.term)).await;
    }

    async fn publish(&self, term: u64) {
        let mut attempt = 0;
        loop {
            if !self.leadership.is_current(term) {
                let reason = if self.leadership.is_leader() { "superseded" } else { "revoked" };
                self.skip(term, reason);
                return;
            }

            attempt += 1;
            let started = Instant::now();
            let result = self.publisher.publish_on_promotion().await;
            self.metrics.record_publish_attempt(result.is_ok(), started.elapsed().as_secs_f64());

            match result {
                Ok(outcome) => {
                    info!(
                        term,
                        attempt,
                        secret = self.publisher.secret_name(),
                        outcome = ?outcome,
                        "Published credential"
                    );
                    self.update(term, attempt, PublishOutcome::Published(outcome), true);
                    return;
                }
                Err(e) => match self.policy.backoff_after(attempt) {
                    Some(delay) => {
                        warn!(
                            term,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Credential publish failed, retrying"
                        );
                        self.update(term, attempt, PublishOutcome::Failed { message: e.to_string() }, false);
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        error!(
                            term,
                            attempts = attempt,
                            error = %e,
                            "Credential publish failed, giving up until the next promotion"
                        );
                        self.update(term, attempt, PublishOutcome::Failed { message: e.to_string() }, false);
                        return;
                    }
                },
            }
        }
    }

    fn skip(&self, term: u64, reason: &'static str) {
        info!(term, reason, "Skipping credential publication");
        self.metrics.record_publish_skipped(reason);
        let mut status = self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        status.last_skip = Some(SkippedPublish { term, reason });
    }

    fn update(&self, term: u64, attempts: u32, outcome: PublishOutcome, success: bool) {
        let mut status = self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        status.last_term = term;
        status.attempts = attempts;
        status.last_outcome = outcome;
        if success {
            status.last_success_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublisherConfig;
    use crate::publisher::{InMemorySecretStore, TimestampTokenFetcher};
    use std::time::Duration;

    struct Fixture {
        leadership: Arc<LeadershipState>,
        store: Arc<InMemorySecretStore>,
        handle: PublishWorkerHandle,
    }

    fn fixture(policy: RetryPolicy, capacity: usize) -> Fixture {
        let (tx, rx) = mpsc::channel(capacity);
        let leadership = Arc::new(LeadershipState::new(tx));
        let store = Arc::new(InMemorySecretStore::new("test"));
        let publisher = Arc::new(CredentialPublisher::new(
            Arc::new(TimestampTokenFetcher::new()),
            store.clone(),
            &PublisherConfig::default(),
        ));
        let handle =
            spawn_publish_worker(publisher, Arc::clone(&leadership), rx, policy, CancellationToken::new());
        Fixture { leadership, store, handle }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_grant_publishes_once() {
        let f = fixture(RetryPolicy::no_retry(), 4);

        f.leadership.on_granted();
        f.leadership.on_granted();
        wait_for(|| f.store.calls().total() == 1).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.store.calls().total(), 1);
        let status = f.handle.status();
        assert_eq!(status.last_term, 1);
        assert_eq!(status.last_outcome, PublishOutcome::Published(ApplyOutcome::Created));
        assert!(status.last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        };
        let f = fixture(policy, 4);
        f.store.fail_next(2);

        f.leadership.on_granted();
        wait_for(|| f.store.calls().total() == 1).await;
        wait_for(|| f.handle.status().attempts == 3).await;

        assert!(f.leadership.is_leader());
        assert!(matches!(f.handle.status().last_outcome, PublishOutcome::Published(_)));
    }

    #[tokio::test]
    async fn test_failure_keeps_leadership() {
        let f = fixture(RetryPolicy::no_retry(), 4);
        f.store.fail_next(1);

        f.leadership.on_granted();
        wait_for(|| matches!(f.handle.status().last_outcome, PublishOutcome::Failed { .. })).await;

        assert!(f.leadership.is_leader());
        assert_eq!(f.store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_revoked_before_dequeue_is_skipped() {
        let (tx, rx) = mpsc::channel(4);
        let leadership = Arc::new(LeadershipState::new(tx));
        let store = Arc::new(InMemorySecretStore::default());
        let publisher = Arc::new(CredentialPublisher::new(
            Arc::new(TimestampTokenFetcher::new()),
            store.clone(),
            &PublisherConfig::default(),
        ));

        leadership.on_granted();
        leadership.on_revoked();
        let handle = spawn_publish_worker(
            publisher,
            Arc::clone(&leadership),
            rx,
            RetryPolicy::no_retry(),
            CancellationToken::new(),
        );

        wait_for(|| handle.status().last_skip.is_some()).await;
        assert_eq!(store.calls().total(), 0);
        let status = handle.status();
        assert_eq!(status.last_skip, Some(SkippedPublish { term: 1, reason: "revoked" }));
        assert_eq!(status.last_outcome, PublishOutcome::Idle);
    }

    #[tokio::test]
    async fn test_stacked_promotions_coalesce() {
        let (tx, rx) = mpsc::channel(4);
        let leadership = Arc::new(LeadershipState::new(tx));
        let store = Arc::new(InMemorySecretStore::default());
        let publisher = Arc::new(CredentialPublisher::new(
            Arc::new(TimestampTokenFetcher::new()),
            store.clone(),
            &PublisherConfig::default(),
        ));

        leadership.on_granted();
        leadership.on_revoked();
        leadership.on_granted();
        let handle = spawn_publish_worker(
            publisher,
            Arc::clone(&leadership),
            rx,
            RetryPolicy::no_retry(),
            CancellationToken::new(),
        );

        wait_for(|| handle.status().last_skip.is_some()).await;
        assert_eq!(store.calls().total(), 1);
        let status = handle.status();
        assert_eq!(status.last_skip, Some(SkippedPublish { term: 2, reason: "superseded" }));
        assert_eq!(status.last_term, 2);
        assert_eq!(status.last_outcome, PublishOutcome::Published(ApplyOutcome::Created));
    }

    #[tokio::test]
    async fn test_retry_abandoned_for_newer_term_is_superseded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(300),
            max_backoff: Duration::from_millis(300),
        };
        let f = fixture(policy, 4);
        f.store.fail_next(1);

        f.leadership.on_granted();
        wait_for(|| matches!(f.handle.status().last_outcome, PublishOutcome::Failed { .. })).await;
        f.leadership.on_revoked();
        f.leadership.on_granted();

        wait_for(|| f.handle.status().last_term == 2 && f.store.calls().total() == 1).await;
        let status = f.handle.status();
        assert_eq!(status.last_skip, Some(SkippedPublish { term: 1, reason: "superseded" }));
        assert_eq!(status.last_outcome, PublishOutcome::Published(ApplyOutcome::Created));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let f = fixture(policy, 4);
        f.store.fail_next(5);

        f.leadership.on_granted();
        wait_for(|| f.handle.status().attempts == 1).await;

        f.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), f.handle.join()).await.unwrap();
    }
}
