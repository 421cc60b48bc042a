//! Service availability tracking from presence signals

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use hostlink_core::{ServiceState, ServiceStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Per-service online/offline state with wake-ups for waiters
///
/// Each service has its own watch channel; waiters on one service never
/// contend with updates to another.
#[derive(Default)]
pub struct AvailabilityTracker {
    services: DashMap<String, watch::Sender<ServiceStatus>>,
}

impl AvailabilityTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe(&self, service_id: &str) -> watch::Receiver<ServiceStatus> {
        self.services
            .entry(service_id.to_string())
            .or_insert_with(|| watch::channel(ServiceStatus::unknown(service_id)).0)
            .subscribe()
    }

    /// Record a presence observation and wake waiters on a state change
    ///
    /// `Unknown` is never accepted: once observed, a service only moves
    /// between Online and Offline. Returns whether the state changed.
    pub fn observe(&self, service_id: &str, state: ServiceState) -> bool {
        if state == ServiceState::Unknown {
            warn!(service = %service_id, "AvailabilityTracker::observe: ignoring Unknown state");
            return false;
        }

        let mut previous = None;
        self.services
            .entry(service_id.to_string())
            .or_insert_with(|| watch::channel(ServiceStatus::unknown(service_id)).0)
            .send_if_modified(|status| {
                status.last_observed_at = Some(SystemTime::now());
                if status.state == state {
                    return false;
                }
                previous = Some(status.state);
                status.state = state;
                true
            });

        match previous {
            Some(from) => {
                info!(service = %service_id, %from, to = %state, "Service status changed");
                true
            }
            None => false,
        }
    }

    /// Current status of a service (`Unknown` if never observed)
    pub fn status(&self, service_id: &str) -> ServiceStatus {
        self.services
            .get(service_id)
            .map(|sender| sender.borrow().clone())
            .unwrap_or_else(|| ServiceStatus::unknown(service_id))
    }

    /// Status of every service seen or waited on so far
    pub fn services(&self) -> Vec<ServiceStatus> {
        self.services
            .iter()
            .map(|entry| entry.value().borrow().clone())
            .collect()
    }

    /// Wait until the service reports Online
    ///
    /// Returns immediately if it already is; fails with
    /// [`Error::ServiceUnavailable`] once `timeout` elapses.
    pub async fn wait_until_online(&self, service_id: &str, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe(service_id);

        let online = matches!(
            tokio::time::timeout(timeout, rx.wait_for(ServiceStatus::is_online)).await,
            Ok(Ok(_))
        );

        if online {
            Ok(())
        } else {
            debug!(
                service = %service_id,
                ?timeout,
                "AvailabilityTracker: wait for service timed out"
            );
            Err(Error::ServiceUnavailable {
                service: service_id.to_string(),
                waited: timeout,
            })
        }
    }

    /// Mark Online services whose last signal is older than `max_age` as Offline
    ///
    /// Returns the IDs of the services that went Offline.
    pub fn mark_stale(&self, max_age: Duration) -> Vec<String> {
        let now = SystemTime::now();
        let mut stale = Vec::new();

        for entry in self.services.iter() {
            let expired = entry.value().send_if_modified(|status| {
                let too_old = status
                    .last_observed_at
                    .and_then(|at| now.duration_since(at).ok())
                    .is_some_and(|age| age > max_age);
                if status.state == ServiceState::Online && too_old {
                    status.state = ServiceState::Offline;
                    true
                } else {
                    false
                }
            });
            if expired {
                info!(service = %entry.key(), ?max_age, "Service heartbeat stale, marked offline");
                stale.push(entry.key().clone());
            }
        }

        stale
    }

    /// Periodically run [`mark_stale`](Self::mark_stale) until the tracker is dropped
    pub fn spawn_stale_sweeper(self: &Arc<Self>, max_age: Duration) -> JoinHandle<()> {
        let tracker = Arc::downgrade(self);
        let period = (max_age / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match tracker.upgrade() {
                    Some(tracker) => {
                        tracker.mark_stale(max_age);
                    }
                    None => return,
                }
            }
        })
    }
}
