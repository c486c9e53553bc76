//! # Secret File Watcher
//!
//! Watches the directory containing the credential file and reloads the
//! [`SecretCache`] whenever something under it changes.
//!
//! The directory is watched rather than the file so that atomic
//! symlink-swap updates (the way Kubernetes refreshes mounted secrets) are
//! observed. Event kinds and file names are not inspected: any batch of
//! non-access events triggers exactly one reload.
//!
//! The loop runs on one dedicated OS thread blocking on a channel fed by the
//! `notify` callback. [`WatchHandle::stop`] sends a sentinel through that same
//! channel, so the blocking wait always wakes up, and then waits for the
//! thread for at most the configured stop timeout.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::SecretCache;
use crate::config::TokenFileConfig;
use crate::errors::{Error, Result};
use crate::observability::health::LivenessProbe;
use crate::observability::metrics::MetricsRecorder;

const THREAD_NAME: &str = "keyholder-secret-watcher";

/// Watcher tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Extra time to keep collecting events into the current batch.
    /// Zero reloads on every batch as delivered.
    pub debounce: Duration,
    /// Upper bound on how long `stop` waits for the loop thread
    pub stop_timeout: Duration,
}

impl WatchOptions {
    pub fn from_config(config: &TokenFileConfig) -> Self {
        Self { debounce: config.debounce(), stop_timeout: config.stop_timeout() }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { debounce: Duration::ZERO, stop_timeout: Duration::from_secs(2) }
    }
}

enum Message {
    Event(notify::Result<Event>),
    Stop,
}

/// What a single message means for the current batch
enum Signal {
    Change,
    Ignored,
    Stop,
    Failed(notify::Error),
}

/// Classifies a message for a watch registered on `root`.
///
/// Removing `root` itself drops the registration without an error event, so
/// it is treated as a failure of the watch.
fn classify(message: Message, root: &Path) -> Signal {
    match message {
        Message::Stop => Signal::Stop,
        Message::Event(Err(e)) => Signal::Failed(e),
        Message::Event(Ok(event)) if matches!(event.kind, EventKind::Access(_)) => Signal::Ignored,
        Message::Event(Ok(event))
            if matches!(event.kind, EventKind::Remove(_)) && event.paths.iter().any(|p| p == root) =>
        {
            Signal::Failed(
                notify::Error::generic("watched directory was removed").add_path(root.to_path_buf()),
            )
        }
        Message::Event(Ok(event)) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "File change notification");
            Signal::Change
        }
    }
}

/// Background source of cache reloads
#[derive(Debug)]
pub struct SecretSource {
    cache: Arc<SecretCache>,
    watch_dir: PathBuf,
    options: WatchOptions,
    liveness: LivenessProbe,
}

impl SecretSource {
    pub fn new(cache: Arc<SecretCache>, watch_dir: impl Into<PathBuf>, options: WatchOptions) -> Self {
        Self { cache, watch_dir: watch_dir.into(), options, liveness: LivenessProbe::new() }
    }

    /// Share a liveness probe that is marked dead if the watch fails
    pub fn with_liveness(mut self, liveness: LivenessProbe) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Register the watch, load the current credential and start the loop.
    ///
    /// The watch is registered before the initial load so a write racing with
    /// startup is never missed. A failed initial load is logged, not returned.
    pub fn start(self) -> Result<WatchHandle> {
        let (tx, rx) = mpsc::channel::<Message>();

        let event_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(Message::Event(res));
        })?;
        watcher.watch(&self.watch_dir, RecursiveMode::NonRecursive).map_err(|e| {
            Error::watch(format!("Failed to watch {}: {}", self.watch_dir.display(), e))
        })?;

        if let Err(e) = self.cache.reload() {
            warn!(error = %e, "Initial credential load failed, waiting for the file to appear");
        }

        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watch_dir = self.watch_dir.clone();
        let stop_timeout = self.options.stop_timeout;

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    self.run(rx);
                    running.store(false, Ordering::Release);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::io("spawning secret watcher thread", e))?
        };

        info!(watch_dir = %watch_dir.display(), "Secret watcher started");
        Ok(WatchHandle {
            tx,
            watcher: Some(watcher),
            thread: Some(thread),
            done_rx,
            running,
            stop_timeout,
        })
    }

    fn run(self, rx: Receiver<Message>) {
        let metrics = MetricsRecorder::new();
        metrics.set_watcher_alive(true);

        loop {
            let first = match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            };

            let mut changes = 0usize;
            match classify(first, &self.watch_dir) {
                Signal::Change => changes += 1,
                Signal::Ignored => continue,
                Signal::Stop => break,
                Signal::Failed(e) => {
                    self.fail(&metrics, e);
                    return;
                }
            }

            match self.collect_batch(&rx, &mut changes) {
                Signal::Stop => break,
                Signal::Failed(e) => {
                    self.fail(&metrics, e);
                    return;
                }
                Signal::Change | Signal::Ignored => {}
            }

            metrics.record_watch_batch(changes);
            // Errors are recorded and logged by the cache; the old value stays.
            let _ = self.cache.reload();
        }

        metrics.set_watcher_alive(false);
        info!(watch_dir = %self.watch_dir.display(), "Secret watcher stopped");
    }

    /// Absorb everything already queued, plus anything arriving within the
    /// debounce window, into the current batch.
    fn collect_batch(&self, rx: &Receiver<Message>, changes: &mut usize) -> Signal {
        loop {
            match rx.try_recv() {
                Ok(message) => match classify(message, &self.watch_dir) {
                    Signal::Change => *changes += 1,
                    Signal::Ignored => {}
                    other => return other,
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Signal::Stop,
            }
        }

        if self.options.debounce.is_zero() {
            return Signal::Change;
        }

        let deadline = Instant::now() + self.options.debounce;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Signal::Change;
            }
            match rx.recv_timeout(remaining) {
                Ok(message) => match classify(message, &self.watch_dir) {
                    Signal::Change => *changes += 1,
                    Signal::Ignored => {}
                    other => return other,
                },
                Err(RecvTimeoutError::Timeout) => return Signal::Change,
                Err(RecvTimeoutError::Disconnected) => return Signal::Stop,
            }
        }
    }

    fn fail(&self, metrics: &MetricsRecorder, e: notify::Error) {
        error!(
            watch_dir = %self.watch_dir.display(),
            error = %e,
            "Secret watcher failed, credential will no longer be refreshed"
        );
        metrics.set_watcher_alive(false);
        self.liveness.mark_dead(format!("secret watcher failed: {}", e));
    }
}

/// Handle for a running [`SecretSource`]
pub struct WatchHandle {
    tx: Sender<Message>,
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    stop_timeout: Duration,
}

impl WatchHandle {
    /// Whether the loop thread is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop and release the watch registration.
    ///
    /// Returns `true` if the thread exited within the stop timeout. Otherwise
    /// the thread is detached and `false` is returned.
    pub fn stop(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };

        let _ = self.tx.send(Message::Stop);
        drop(self.watcher.take());

        match self.done_rx.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                debug!("Secret watcher thread joined");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Secret watcher did not stop in time, detaching thread"
                );
                false
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.tx.send(Message::Stop);
            self.watcher.take();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("running", &self.is_running())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}
