//! # Leadership State
//!
//! Tracks whether this replica currently holds leadership, as reported by an
//! external leader-election provider through [`LeadershipListener`].
//!
//! The flag and a monotonically increasing promotion term are packed into a
//! single `AtomicU64` (`term << 1 | leader_bit`), so a reader always sees a
//! consistent (flag, term) pair without taking a lock.
//!
//! A real NOT_LEADER → LEADER transition bumps the term and enqueues a
//! [`PublishRequest`] onto the bounded publish queue. Enqueueing never blocks
//! and never fails the notification: the provider's callback returns as soon
//! as the flag is updated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::metrics::MetricsRecorder;

mod lease;

pub use lease::LeaseElection;
pub(crate) use lease::LeaseTask;

const LEADER_BIT: u64 = 1;

/// Work item asking the publish worker to mint and publish a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRequest {
    /// Promotion term that produced this request
    pub term: u64,
}

/// Inbound seam for a leader-election provider.
///
/// Implementations must tolerate being called from any thread, in any
/// interleaving with readers, and must never panic or block on I/O.
pub trait LeadershipListener: Send + Sync {
    /// Leadership was granted to this replica
    fn granted(&self);

    /// Leadership was revoked from this replica
    fn revoked(&self);
}

/// Point-in-time view of the leadership state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadershipSnapshot {
    pub is_leader: bool,
    pub term: u64,
}

impl LeadershipSnapshot {
    fn from_bits(bits: u64) -> Self {
        Self { is_leader: bits & LEADER_BIT == LEADER_BIT, term: bits >> 1 }
    }
}

/// Authoritative leadership flag for this replica
#[derive(Debug)]
pub struct LeadershipState {
    bits: AtomicU64,
    publish_tx: mpsc::Sender<PublishRequest>,
    metrics: MetricsRecorder,
}

impl LeadershipState {
    /// Creates a non-leader state that enqueues promotions on `publish_tx`
    pub fn new(publish_tx: mpsc::Sender<PublishRequest>) -> Self {
        Self { bits: AtomicU64::new(0), publish_tx, metrics: MetricsRecorder::new() }
    }

    pub fn is_leader(&self) -> bool {
        self.snapshot().is_leader
    }

    /// Term of the latest promotion (0 before the first grant)
    pub fn current_term(&self) -> u64 {
        self.snapshot().term
    }

    pub fn snapshot(&self) -> LeadershipSnapshot {
        LeadershipSnapshot::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Whether this replica is still leader within promotion `term`
    pub fn is_current(&self, term: u64) -> bool {
        self.bits.load(Ordering::Acquire) == (term << 1) | LEADER_BIT
    }

    /// Handles a grant. Returns `true` when this was a real promotion.
    ///
    /// A grant while already leader changes nothing and does not re-publish.
    pub fn on_granted(&self) -> bool {
        let transition = self.bits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            if bits & LEADER_BIT == LEADER_BIT {
                None
            } else {
                Some((((bits >> 1) + 1) << 1) | LEADER_BIT)
            }
        });

        match transition {
            Ok(previous) => {
                let term = (previous >> 1) + 1;
                self.metrics.record_leadership(true, true);
                info!(term, "Leadership granted, this replica is now the leader");
                self.enqueue_publish(PublishRequest { term });
                true
            }
            Err(_) => {
                self.metrics.record_leadership(true, false);
                debug!("Leadership granted while already leader, ignoring");
                false
            }
        }
    }

    /// Handles a revoke. Returns `true` when leadership was actually held.
    pub fn on_revoked(&self) -> bool {
        let previous = self.bits.fetch_and(!LEADER_BIT, Ordering::AcqRel);
        let was_leader = previous & LEADER_BIT == LEADER_BIT;
        self.metrics.record_leadership(false, was_leader);
        if was_leader {
            info!(term = previous >> 1, "Leadership revoked, this replica is no longer the leader");
        } else {
            debug!("Leadership revoked while not leader, ignoring");
        }
        was_leader
    }

    fn enqueue_publish(&self, request: PublishRequest) {
        match self.publish_tx.try_send(request) {
            Ok(()) => debug!(term = request.term, "Queued credential publication"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // The worker publishes for the newest term when it dequeues any
                // pending request, so this promotion is still covered.
                warn!(term = request.term, "Publish queue full, coalescing with pending request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(term = request.term, "Publish worker is not running, credential will not be published");
            }
        }
    }
}

impl LeadershipListener for LeadershipState {
    fn granted(&self) {
        self.on_granted();
    }

    fn revoked(&self) {
        self.on_revoked();
    }
}

/// Adapts a provider that publishes its lock state on a `watch` channel into
/// ordered `granted`/`revoked` calls.
///
/// The current value is applied immediately. Intermediate values the channel
/// collapsed are not replayed; only the latest state is delivered.
///
/// The bridge stops when `cancel` fires or the sender is dropped. A provider
/// that goes away can no longer vouch for the lock, so a dropped sender also
/// revokes leadership.
pub fn spawn_watch_bridge(
    mut rx: watch::Receiver<bool>,
    listener: Arc<dyn LeadershipListener>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = *rx.borrow_and_update();
        deliver(listener.as_ref(), last);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Leadership bridge cancelled");
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        if last {
                            warn!("Leadership provider closed its channel, giving up leadership");
                            listener.revoked();
                        } else {
                            info!("Leadership provider closed its channel, stopping bridge");
                        }
                        break;
                    }
                    let value = *rx.borrow_and_update();
                    if value != last {
                        deliver(listener.as_ref(), value);
                        last = value;
                    }
                }
            }
        }
    })
}

fn deliver(listener: &dyn LeadershipListener, is_leader: bool) {
    if is_leader {
        listener.granted();
    } else {
        listener.revoked();
    }
}
