//! Correlation registry: pending calls keyed by tracking ID
//!
//! Each pending call owns a single-settlement slot (a oneshot sender) and a
//! deadline timer. Settlement and removal are one step: the entry is taken
//! out of the map before its slot is written, so a second response, a late
//! timer or a concurrent cancel never finds it again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hostlink_core::{Envelope, TrackingId};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// How long a settled tracking ID is remembered for late-response detection
const SETTLED_RETENTION: Duration = Duration::from_secs(60);

/// Settlements between two prunes of the settled-ID memory
const PRUNE_EVERY: u64 = 256;

type Slot = oneshot::Sender<Result<Envelope>>;

struct PendingEntry {
    created_at: Instant,
    deadline: Instant,
    slot: Slot,
    timer: AbortHandle,
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub failed: u64,
    /// Responses for calls that had already settled
    pub late_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    late_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

/// Why the registry stopped taking registrations
#[derive(Debug, Clone)]
enum Closure {
    Failed(String),
    Cancelled(String),
}

impl Closure {
    fn error(&self) -> Error {
        match self {
            Self::Failed(message) => Error::Transport(message.clone()),
            Self::Cancelled(reason) => Error::Cancelled(reason.clone()),
        }
    }

    fn outcome(&self) -> Outcome {
        match self {
            Self::Failed(_) => Outcome::Failed,
            Self::Cancelled(_) => Outcome::Cancelled,
        }
    }
}

/// Result of routing an inbound envelope through the registry
#[derive(Debug)]
pub enum Routing {
    /// Matched a pending call, which is now settled
    Completed,
    /// Belongs to a call that already settled; dropped
    Late,
    /// Not a response to any known call
    Unmatched(Envelope),
}

/// Map of outstanding tracking IDs to their completion slots
///
/// Entries are locked per shard, so unrelated calls do not contend. Deadline
/// timers are spawned on the current Tokio runtime.
pub struct CorrelationRegistry {
    pending: DashMap<TrackingId, PendingEntry>,
    settled: DashMap<TrackingId, Instant>,
    settled_retention: Duration,
    settlements: AtomicU64,
    counters: Counters,
    closed: OnceLock<Closure>,
}

impl CorrelationRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_settled_retention(SETTLED_RETENTION)
    }

    /// Registry that remembers settled IDs for `retention` instead of 60s
    pub fn with_settled_retention(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            settled: DashMap::new(),
            settled_retention: retention,
            settlements: AtomicU64::new(0),
            counters: Counters::default(),
            closed: OnceLock::new(),
        })
    }

    /// Register a pending call and arm its deadline timer
    ///
    /// Fails with [`Error::DuplicateTrackingId`] if the ID is already pending
    /// and with the closing error once the registry has been closed.
    pub fn register(
        self: &Arc<Self>,
        tracking_id: TrackingId,
        timeout: Duration,
    ) -> Result<PendingCall> {
        if let Some(closure) = self.closed.get() {
            return Err(closure.error());
        }

        let created_at = Instant::now();
        let deadline = created_at + timeout;

        match self.pending.entry(tracking_id.clone()) {
            Entry::Occupied(_) => {
                warn!(%tracking_id, "CorrelationRegistry::register: duplicate tracking id");
                Err(Error::DuplicateTrackingId(tracking_id))
            }
            Entry::Vacant(vacant) => {
                let (slot, rx) = oneshot::channel();

                // The shard stays locked until the entry is inserted, so the
                // timer cannot observe a missing entry even for a zero timeout.
                let registry = Arc::downgrade(self);
                let timer_id = tracking_id.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(registry) = registry.upgrade() {
                        registry.expire(&timer_id);
                    }
                })
                .abort_handle();

                vacant.insert(PendingEntry {
                    created_at,
                    deadline,
                    slot,
                    timer,
                });
                self.counters.registered.fetch_add(1, Ordering::Relaxed);
                trace!(%tracking_id, ?timeout, "CorrelationRegistry::register: pending");

                // Lost a race with close(): its drain may have missed this entry
                if let Some(closure) = self.closed.get() {
                    self.settle_with(&tracking_id, closure.error(), closure.outcome());
                }

                Ok(PendingCall {
                    tracking_id,
                    created_at,
                    deadline,
                    rx,
                    registry: Arc::downgrade(self),
                    finished: false,
                })
            }
        }
    }

    /// Settle a pending call with its response
    ///
    /// Returns `false` when nothing matched (late, duplicate or unknown
    /// response); the envelope is dropped.
    pub fn complete(&self, tracking_id: &TrackingId, envelope: Envelope) -> bool {
        match self.take(tracking_id) {
            Some((id, entry)) => {
                self.settle(id, entry, Ok(envelope), Outcome::Completed);
                true
            }
            None => {
                if self.note_if_late(tracking_id) {
                    debug!(%tracking_id, "CorrelationRegistry::complete: late response dropped");
                } else {
                    debug!(%tracking_id, "CorrelationRegistry::complete: no pending call");
                }
                false
            }
        }
    }

    /// Route an inbound envelope by its own tracking ID
    pub fn route(&self, envelope: Envelope) -> Routing {
        match self.take(&envelope.tracking_id) {
            Some((id, entry)) => {
                self.settle(id, entry, Ok(envelope), Outcome::Completed);
                Routing::Completed
            }
            None if self.note_if_late(&envelope.tracking_id) => {
                debug!(
                    tracking_id = %envelope.tracking_id,
                    source = %envelope.source_service,
                    "CorrelationRegistry::route: late response dropped"
                );
                Routing::Late
            }
            None => Routing::Unmatched(envelope),
        }
    }

    /// Settle a pending call as cancelled
    pub fn cancel(&self, tracking_id: &TrackingId, reason: impl Into<String>) -> bool {
        self.settle_with(tracking_id, Error::Cancelled(reason.into()), Outcome::Cancelled)
    }

    /// Settle a pending call with a transport failure
    pub fn fail(&self, tracking_id: &TrackingId, message: impl Into<String>) -> bool {
        self.settle_with(tracking_id, Error::Transport(message.into()), Outcome::Failed)
    }

    /// Settle a pending call whose deadline elapsed
    pub fn expire(&self, tracking_id: &TrackingId) -> bool {
        match self.take(tracking_id) {
            Some((id, entry)) => {
                let after = entry.deadline.saturating_duration_since(entry.created_at);
                let error = Error::Timeout {
                    tracking_id: id.clone(),
                    after,
                };
                self.settle(id, entry, Err(error), Outcome::TimedOut);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending call, returning how many were settled
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.drain(|| Error::Cancelled(reason.to_string()), Outcome::Cancelled)
    }

    /// Fail every pending call with a transport error
    pub fn fail_all(&self, message: &str) -> usize {
        self.drain(|| Error::Transport(message.to_string()), Outcome::Failed)
    }

    /// Fail every pending call and refuse new registrations
    pub fn close(&self, message: &str) -> usize {
        let _ = self.closed.set(Closure::Failed(message.to_string()));
        self.fail_all(message)
    }

    /// Cancel every pending call and refuse new registrations
    pub fn cancel_and_close(&self, reason: &str) -> usize {
        let _ = self.closed.set(Closure::Cancelled(reason.to_string()));
        self.cancel_all(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    pub fn contains(&self, tracking_id: &TrackingId) -> bool {
        self.pending.contains_key(tracking_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let c = &self.counters;
        RegistryStats {
            registered: c.registered.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            late_dropped: c.late_dropped.load(Ordering::Relaxed),
        }
    }

    /// Take a pending entry out of the map
    ///
    /// The ID goes into `settled` before it leaves `pending`, so a concurrent
    /// `route` always finds it in one of the two maps.
    fn take(&self, tracking_id: &TrackingId) -> Option<(TrackingId, PendingEntry)> {
        if !self.pending.contains_key(tracking_id) {
            return None;
        }
        self.settled.insert(tracking_id.clone(), Instant::now());
        self.pending.remove(tracking_id)
    }

    fn settle_with(&self, tracking_id: &TrackingId, error: Error, outcome: Outcome) -> bool {
        match self.take(tracking_id) {
            Some((id, entry)) => {
                self.settle(id, entry, Err(error), outcome);
                true
            }
            None => false,
        }
    }

    fn drain(&self, make_error: impl Fn() -> Error, outcome: Outcome) -> usize {
        let ids: Vec<TrackingId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut settled = 0;
        for id in ids {
            // A concurrent completion may win; that entry is simply gone
            if let Some((id, entry)) = self.take(&id) {
                self.settle(id, entry, Err(make_error()), outcome);
                settled += 1;
            }
        }
        settled
    }

    fn settle(
        &self,
        id: TrackingId,
        entry: PendingEntry,
        result: Result<Envelope>,
        outcome: Outcome,
    ) {
        entry.timer.abort();

        let counter = match outcome {
            Outcome::Completed => &self.counters.completed,
            Outcome::TimedOut => &self.counters.timed_out,
            Outcome::Cancelled => &self.counters.cancelled,
            Outcome::Failed => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let elapsed = entry.created_at.elapsed();
        if entry.slot.send(result).is_err() {
            debug!(
                tracking_id = %id,
                ?outcome,
                "CorrelationRegistry: caller gone before settlement"
            );
        } else {
            trace!(tracking_id = %id, ?outcome, ?elapsed, "CorrelationRegistry: settled");
        }

        self.note_settlement();
    }

    fn note_settlement(&self) {
        let settlements = self.settlements.fetch_add(1, Ordering::Relaxed) + 1;
        if settlements % PRUNE_EVERY == 0 {
            let retention = self.settled_retention;
            self.settled.retain(|_, at| at.elapsed() < retention);
        }
    }

    fn note_if_late(&self, tracking_id: &TrackingId) -> bool {
        if self.settled.contains_key(tracking_id) {
            self.counters.late_dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// Handle to one registered call
///
/// Dropping the handle before it settles cancels the call and removes it
/// from the registry.
pub struct PendingCall {
    tracking_id: TrackingId,
    created_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Envelope>>,
    registry: Weak<CorrelationRegistry>,
    finished: bool,
}

impl PendingCall {
    pub fn tracking_id(&self) -> &TrackingId {
        &self.tracking_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Suspend until the call settles
    pub async fn wait(mut self) -> Result<Envelope> {
        let outcome = (&mut self.rx).await;
        self.finished = true;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Transport("correlation registry dropped".to_string())),
        }
    }

    /// Cancel the call explicitly
    pub fn cancel(mut self, reason: impl Into<String>) -> bool {
        self.finished = true;
        match self.registry.upgrade() {
            Some(registry) => registry.cancel(&self.tracking_id, reason),
            None => false,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.cancel(&self.tracking_id, "caller abandoned the call") {
                debug!(tracking_id = %self.tracking_id, "PendingCall dropped before settlement");
            }
        }
    }
}
