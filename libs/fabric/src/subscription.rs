use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use hostlink_core::Envelope;
use tracing::debug;

use crate::error::Error;

/// Receiver of broadcast (non-correlated) inbound traffic
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: Envelope);

    /// Called once when the hub connection fails for good
    async fn on_transport_error(&self, error: &Error) {
        debug!(%error, "MessageHandler: transport error ignored");
    }
}

#[async_trait::async_trait]
impl<F> MessageHandler for F
where
    F: Fn(Envelope) + Send + Sync + 'static,
{
    async fn handle(&self, envelope: Envelope) {
        (self)(envelope)
    }
}

/// Selects which inbound envelopes a subscription receives
///
/// Every field that is set must match; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub message_type: Option<String>,
    pub destination_service: Option<String>,
}

impl MessageFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn message_type(message_type: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type.into()),
            destination_service: None,
        }
    }

    pub fn destination(service: impl Into<String>) -> Self {
        Self {
            message_type: None,
            destination_service: Some(service.into()),
        }
    }

    pub fn and_destination(mut self, service: impl Into<String>) -> Self {
        self.destination_service = Some(service.into());
        self
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.message_type
            .as_deref()
            .map_or(true, |t| t == envelope.message_type)
            && self
                .destination_service
                .as_deref()
                .map_or(true, |d| d == envelope.destination_service)
    }
}

struct Entry {
    filter: MessageFilter,
    handler: Arc<dyn MessageHandler>,
}

/// Set of active subscriptions
#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    entries: DashMap<u64, Entry>,
}

impl Subscriptions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(
        self: &Arc<Self>,
        filter: MessageFilter,
        handler: impl MessageHandler,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, ?filter, "Subscriptions::add");
        self.entries.insert(
            id,
            Entry {
                filter,
                handler: Arc::new(handler),
            },
        );
        Subscription {
            id,
            set: Arc::downgrade(self),
        }
    }

    pub fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Handlers whose filter matches the envelope
    pub fn matching(&self, envelope: &Envelope) -> Vec<Arc<dyn MessageHandler>> {
        self.entries
            .iter()
            .filter(|entry| entry.filter.matches(envelope))
            .map(|entry| entry.handler.clone())
            .collect()
    }

    pub fn handlers(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.entries.iter().map(|entry| entry.handler.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle for an active subscription; unsubscribes when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    set: Weak<Subscriptions>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
